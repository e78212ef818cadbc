//! Job definitions, submission, and results.
//!
//! A [`JobSpec`] immutably describes one external simulation run. The
//! [`JobRunner`] validates it, spawns the monitor loop that owns the process,
//! and hands back a [`JobFuture`](crate::future::JobFuture). On terminal
//! success the injected [`Materializer`] runs exactly once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FailureCause, SimwatchError};
use crate::future::JobFuture;
use crate::handlers::HandlerRegistry;
use crate::monitor::{MonitorConfig, MonitorLoop};

/// Stop-signal file cleared when a job is resumed in an existing directory.
pub const STOP_FILE: &str = "STOP";

/// Immutable description of one external simulation run.
///
/// Created once per submission and never mutated afterwards; restarts of the
/// same job re-render only the command from current control parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub working_dir: PathBuf,
    /// Command template. `{key}` placeholders are substituted from the job's
    /// control parameters at every (re)launch.
    pub command: String,
    /// Files that must exist in the working directory before launch.
    #[serde(default)]
    pub required_files: Vec<String>,
    /// Files that must exist after a clean exit for the job to count as done.
    #[serde(default)]
    pub expected_outputs: Vec<String>,
    /// Opaque resource/queue hint, carried through to reporting.
    #[serde(default)]
    pub queue_hint: Option<String>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, working_dir: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            working_dir: working_dir.into(),
            command: command.into(),
            required_files: Vec::new(),
            expected_outputs: Vec::new(),
            queue_hint: None,
        }
    }

    pub fn with_required_files(mut self, files: &[&str]) -> Self {
        self.required_files = files.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_expected_outputs(mut self, files: &[&str]) -> Self {
        self.expected_outputs = files.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Succeeded,
    Failed(FailureCause),
    Aborted,
}

/// One applied correction, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub handler: String,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

/// Opaque handle to whatever the materializer produced for a successful job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultHandle {
    pub data: serde_json::Value,
}

/// Immutable record of a job that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub name: String,
    pub outcome: JobOutcome,
    pub handle: Option<ResultHandle>,
    /// Ordered audit trail of every correction applied across restarts.
    pub corrections: Vec<Correction>,
    pub exit_code: Option<i32>,
    pub working_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, JobOutcome::Succeeded)
    }

    pub fn aborted(&self) -> bool {
        matches!(self.outcome, JobOutcome::Aborted)
    }

    /// One-line description used in error messages and reports.
    pub fn summary(&self) -> String {
        match &self.outcome {
            JobOutcome::Succeeded => format!(
                "'{}' succeeded after {} correction(s)",
                self.name,
                self.corrections.len()
            ),
            JobOutcome::Failed(cause) => format!("'{}': {}", self.name, cause.kind),
            JobOutcome::Aborted => format!("'{}' was aborted", self.name),
        }
    }
}

/// Materializes a domain-specific result from a finished working directory.
///
/// Invoked exactly once per successful job, only after all expected output
/// files exist. Its internals (database writes, derived files) are outside
/// the engine's scope.
pub trait Materializer: Send + Sync {
    fn materialize(&self, dir: &Path) -> Result<ResultHandle>;
}

/// Materializer for pipelines that only need supervision.
pub struct NullMaterializer;

impl Materializer for NullMaterializer {
    fn materialize(&self, _dir: &Path) -> Result<ResultHandle> {
        Ok(ResultHandle {
            data: serde_json::Value::Null,
        })
    }
}

/// Submits jobs and wires each one to its own monitor loop.
#[derive(Clone)]
pub struct JobRunner {
    registry: Arc<HandlerRegistry>,
    materializer: Arc<dyn Materializer>,
    monitor: MonitorConfig,
}

impl JobRunner {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        materializer: Arc<dyn Materializer>,
        monitor: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            materializer,
            monitor,
        }
    }

    /// Checks a spec's preconditions without launching anything.
    pub fn validate(&self, spec: &JobSpec) -> Result<(), SimwatchError> {
        if !spec.working_dir.is_dir() {
            return Err(SimwatchError::Config(format!(
                "working directory {} does not exist",
                spec.working_dir.display()
            )));
        }
        if spec.command.trim().is_empty() {
            return Err(SimwatchError::Config(format!(
                "job '{}' has an empty command",
                spec.name
            )));
        }
        for file in &spec.required_files {
            let path = spec.working_dir.join(file);
            if !path.exists() {
                return Err(SimwatchError::MissingInput(path));
            }
        }
        Ok(())
    }

    /// Validates required inputs, then spawns the monitor loop and returns
    /// its future. A spec that fails validation never launches a process.
    pub fn submit(&self, spec: JobSpec) -> Result<JobFuture, SimwatchError> {
        self.validate(&spec)?;

        let job_id = Uuid::new_v4().to_string();
        let (future, writer, abort_rx) = JobFuture::new(&job_id, &spec.name, &spec.working_dir);

        let monitor = MonitorLoop::new(
            job_id,
            spec,
            self.registry.clone(),
            self.materializer.clone(),
            self.monitor.clone(),
            writer,
            abort_rx,
        );
        tokio::spawn(monitor.run());

        Ok(future)
    }
}

/// Clears stale control artifacts (the stop signal and lock files) left by a
/// previously terminated attempt. Called before resuming a job in an
/// existing working directory.
pub fn setup_restart(dir: &Path) -> std::io::Result<()> {
    let stop = dir.join(STOP_FILE);
    if stop.exists() {
        std::fs::remove_file(&stop)?;
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("lock") {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
