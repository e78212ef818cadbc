//! Supervision of one running job.
//!
//! The [`MonitorLoop`] owns the process lifetime for exactly one job: it
//! launches the external command from the current control parameters, tails
//! the output files the live handlers watch, and on any detected signature
//! kills the process, applies corrections in registry priority order,
//! persists the control store, and relaunches. Clean exits are still checked
//! against post-mortem handlers and the expected output files before the
//! job's future resolves.

pub mod tail;

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::watch;

use crate::config::SimwatchConfig;
use crate::control::ControlStore;
use crate::error::{FailureCause, FailureKind};
use crate::future::FutureWriter;
use crate::handlers::{ErrorEvent, HandlerRegistry};
use crate::job::{Correction, JobOutcome, JobResult, JobSpec, Materializer};

use tail::FileTail;

/// Timing and reporting knobs for one monitor loop.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between output scans while the process runs.
    pub poll_interval: Duration,
    /// Maximum size of the output excerpt attached to failures.
    pub output_excerpt_bytes: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            output_excerpt_bytes: 1024,
        }
    }
}

impl MonitorConfig {
    pub fn from_config(config: &SimwatchConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            output_excerpt_bytes: config.output_excerpt_bytes,
        }
    }
}

/// The states a supervised job moves through.
///
/// Each launch flows STARTING → RUNNING, then either COMPLETED, or
/// CORRECTING and back to STARTING, until a terminal FAILED/ABORTED/COMPLETED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorState {
    Starting,
    Running,
    Correcting,
    Completed,
    Failed,
    Aborted,
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorState::Starting => write!(f, "STARTING"),
            MonitorState::Running => write!(f, "RUNNING"),
            MonitorState::Correcting => write!(f, "CORRECTING"),
            MonitorState::Completed => write!(f, "COMPLETED"),
            MonitorState::Failed => write!(f, "FAILED"),
            MonitorState::Aborted => write!(f, "ABORTED"),
        }
    }
}

// What ended one pass through the running select loop.
enum RunEnd {
    Exited(std::io::Result<ExitStatus>),
    AbortRequested,
    Tick,
}

/// Drives one job to a terminal state. The only writer of the job's control
/// store and future; no other component may signal or restart its process.
pub struct MonitorLoop {
    job_id: String,
    spec: JobSpec,
    registry: Arc<HandlerRegistry>,
    materializer: Arc<dyn Materializer>,
    config: MonitorConfig,
    writer: FutureWriter,
    abort_rx: watch::Receiver<bool>,
    corrections: Vec<Correction>,
    last_output: String,
}

impl MonitorLoop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        job_id: String,
        spec: JobSpec,
        registry: Arc<HandlerRegistry>,
        materializer: Arc<dyn Materializer>,
        config: MonitorConfig,
        writer: FutureWriter,
        abort_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            job_id,
            spec,
            registry,
            materializer,
            config,
            writer,
            abort_rx,
            corrections: Vec::new(),
            last_output: String::new(),
        }
    }

    /// Runs the job to a terminal state and resolves its future.
    pub(crate) async fn run(mut self) {
        let result = self.supervise().await;
        self.writer.resolve(result);
    }

    async fn supervise(&mut self) -> JobResult {
        let started_at = Utc::now();

        let mut store = match ControlStore::load(&self.spec.working_dir) {
            Ok(store) => store,
            Err(e) => {
                return self.fail(
                    started_at,
                    None,
                    FailureKind::Configuration(format!("failed to load control state: {e}")),
                );
            }
        };

        self.writer.set_running();

        let mut tails: HashMap<String, FileTail> = HashMap::new();
        let mut interval = tokio::time::interval(self.config.poll_interval);

        loop {
            if *self.abort_rx.borrow() {
                return self.finish(started_at, None, JobOutcome::Aborted, None);
            }

            // Starting: the command line is re-derived from current control
            // parameters on every launch, so corrections take effect.
            let command = render_command(&self.spec.command, &store);
            let mut child = match launch(&command, &self.spec) {
                Ok(child) => child,
                Err(e) => {
                    return self.fail(
                        started_at,
                        None,
                        FailureKind::Configuration(format!("failed to launch '{command}': {e}")),
                    );
                }
            };

            // Running: poll until exit, abort, or a live signature.
            let status = 'running: loop {
                let end = tokio::select! {
                    status = child.wait() => RunEnd::Exited(status),
                    _ = wait_for_abort(&mut self.abort_rx) => RunEnd::AbortRequested,
                    _ = interval.tick() => RunEnd::Tick,
                };

                match end {
                    RunEnd::Exited(status) => break 'running Some(status),
                    RunEnd::AbortRequested => {
                        kill_and_reap(&mut child).await;
                        return self.finish(started_at, None, JobOutcome::Aborted, None);
                    }
                    RunEnd::Tick => {
                        let events = self.scan(&mut tails, ScanMode::Live);
                        if events.is_empty() {
                            continue;
                        }
                        // Correcting: the process dies before anything
                        // touches its control files.
                        kill_and_reap(&mut child).await;
                        if let Err(kind) = self.apply_corrections(&mut store, &events) {
                            return self.fail(started_at, None, kind);
                        }
                        break 'running None;
                    }
                }
            };

            // A correction pass ended this launch; go back to Starting.
            let Some(status) = status else { continue };

            let status = match status {
                Ok(status) => status,
                Err(e) => {
                    return self.fail(
                        started_at,
                        None,
                        FailureKind::Configuration(format!("failed to reap process: {e}")),
                    );
                }
            };
            let exit_code = status.code();

            // The process is gone; evaluate live handlers over the remaining
            // growth and post-mortem handlers once over the full output. A
            // match here is a Correcting transition even though the process
            // already exited.
            let events = self.scan(&mut tails, ScanMode::Final);
            if !events.is_empty() {
                if let Err(kind) = self.apply_corrections(&mut store, &events) {
                    return self.fail(started_at, exit_code, kind);
                }
                continue;
            }

            if status.success() {
                let missing = self.missing_outputs();
                if !missing.is_empty() {
                    // A clean exit without its outputs is a silent partial
                    // write, not a success.
                    return self.fail(
                        started_at,
                        exit_code,
                        FailureKind::MissingOutputs { files: missing },
                    );
                }

                return match self.materializer.materialize(&self.spec.working_dir) {
                    Ok(handle) => {
                        self.finish(started_at, exit_code, JobOutcome::Succeeded, Some(handle))
                    }
                    Err(e) => self.fail(
                        started_at,
                        exit_code,
                        FailureKind::Configuration(format!("result materialization failed: {e}")),
                    ),
                };
            }

            // Non-zero exit that no handler recognized: never retried blindly.
            return self.fail(started_at, exit_code, FailureKind::Unrecognized { exit_code });
        }
    }

    fn scan(&mut self, tails: &mut HashMap<String, FileTail>, mode: ScanMode) -> Vec<ErrorEvent> {
        let registry = self.registry.clone();
        let mut growth: HashMap<String, String> = HashMap::new();
        let mut events = Vec::new();

        for handler in registry.iter() {
            if matches!(mode, ScanMode::Live) && !handler.is_live_monitor() {
                continue;
            }

            let file = handler.watch_file().to_string();
            if handler.is_live_monitor() && !growth.contains_key(&file) {
                let tail = tails
                    .entry(file.clone())
                    .or_insert_with(|| FileTail::new(self.spec.working_dir.join(&file)));
                let content = tail.read_new().unwrap_or_default();
                self.push_excerpt(&content);
                growth.insert(file.clone(), content);
            }

            let matched = if handler.is_live_monitor() {
                let content = growth.get(&file).map(String::as_str).unwrap_or("");
                handler.first_match(content).map(str::to_string)
            } else {
                // Post-mortem handlers see the whole file: a signature the
                // live scans tailed past must still count once.
                let full = FileTail::new(self.spec.working_dir.join(&file))
                    .read_all()
                    .unwrap_or_default();
                handler.first_match(&full).map(str::to_string)
            };

            if let Some(signature) = matched {
                events.push(ErrorEvent::new(handler.name(), &signature));
            }
        }

        events
    }

    /// Applies one correction pass in registry priority order. Scanning
    /// produced at most one event per handler, so re-scanning after each
    /// correction reduces to never applying the same handler twice — the
    /// matches are textual and control mutations cannot change them.
    fn apply_corrections(
        &mut self,
        store: &mut ControlStore,
        events: &[ErrorEvent],
    ) -> Result<(), FailureKind> {
        for event in events {
            let Some(handler) = self
                .registry
                .iter()
                .find(|h| h.name() == event.handler)
                .cloned()
            else {
                continue;
            };

            if store.error_count(handler.name()) >= handler.max_attempts() {
                return Err(FailureKind::Exhausted {
                    handler: handler.name().to_string(),
                });
            }

            match handler.correct(store, &self.spec.working_dir) {
                Ok(description) => {
                    eprintln!("  ↻ {}: {}", handler.name(), description);
                    self.corrections.push(Correction {
                        handler: handler.name().to_string(),
                        description,
                        applied_at: Utc::now(),
                    });
                    // Durable before the next decision: a killed monitor must
                    // not forget an attempt it already made.
                    if let Err(e) = store.persist() {
                        return Err(FailureKind::Configuration(format!(
                            "failed to persist control state: {e}"
                        )));
                    }
                }
                Err(e) => {
                    return Err(FailureKind::Configuration(format!(
                        "correction by '{}' failed: {e}",
                        handler.name()
                    )));
                }
            }
        }
        Ok(())
    }

    fn missing_outputs(&self) -> Vec<String> {
        self.spec
            .expected_outputs
            .iter()
            .filter(|file| !self.spec.working_dir.join(file).exists())
            .cloned()
            .collect()
    }

    fn push_excerpt(&mut self, content: &str) {
        if content.is_empty() {
            return;
        }
        self.last_output.push_str(content);
        let max = self.config.output_excerpt_bytes;
        if self.last_output.len() > max {
            let mut cut = self.last_output.len() - max;
            while !self.last_output.is_char_boundary(cut) {
                cut += 1;
            }
            self.last_output.drain(..cut);
        }
    }

    fn fail(
        &mut self,
        started_at: chrono::DateTime<Utc>,
        exit_code: Option<i32>,
        kind: FailureKind,
    ) -> JobResult {
        let cause = if self.last_output.trim().is_empty() {
            FailureCause::new(kind)
        } else {
            FailureCause::with_excerpt(kind, self.last_output.clone())
        };
        self.finish(started_at, exit_code, JobOutcome::Failed(cause), None)
    }

    fn finish(
        &mut self,
        started_at: chrono::DateTime<Utc>,
        exit_code: Option<i32>,
        outcome: JobOutcome,
        handle: Option<crate::job::ResultHandle>,
    ) -> JobResult {
        JobResult {
            job_id: self.job_id.clone(),
            name: self.spec.name.clone(),
            outcome,
            handle,
            corrections: std::mem::take(&mut self.corrections),
            exit_code,
            working_dir: self.spec.working_dir.clone(),
            started_at,
            finished_at: Utc::now(),
        }
    }
}

enum ScanMode {
    /// Live handlers only, over file growth since the last tick.
    Live,
    /// All handlers, after the process exited.
    Final,
}

/// Substitutes `{key}` placeholders from the control parameters. Unknown
/// keys are left as-is so a typo is visible in the launched command.
pub fn render_command(template: &str, store: &ControlStore) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match store.get(key) {
                    Some(serde_json::Value::String(s)) => out.push_str(s),
                    Some(value) => out.push_str(&value.to_string()),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn launch(command: &str, spec: &JobSpec) -> std::io::Result<Child> {
    Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(&spec.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}

async fn kill_and_reap(child: &mut Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}

pub(crate) async fn wait_for_abort(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Every abort handle was dropped; cancellation can no longer
            // arrive for this job.
            std::future::pending::<()>().await;
        }
    }
}
