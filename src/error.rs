use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::JobResult;

#[derive(Debug, Error)]
pub enum SimwatchError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Required input file missing: {0}")]
    MissingInput(PathBuf),

    #[error("No checkpoint found in {0} where one was expected")]
    CheckpointNotFound(PathBuf),

    #[error("Job failed: {}", .0.summary())]
    JobFailed(Box<JobResult>),

    #[error("Job aborted: {}", .0.summary())]
    JobAborted(Box<JobResult>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SimwatchError {
    /// Returns the terminal job result carried by `JobFailed`/`JobAborted`,
    /// if this error wraps one. Fan-in uses this to keep failed branches as
    /// result markers instead of dropping them.
    pub fn into_job_result(self) -> Option<JobResult> {
        match self {
            SimwatchError::JobFailed(result) | SimwatchError::JobAborted(result) => Some(*result),
            _ => None,
        }
    }
}

/// Classifies a terminal job failure.
///
/// Recognized-recoverable errors never surface here — they are corrected
/// inside the monitor loop. Everything that does surface is fatal for the
/// job and must name its cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// A handler matched again after its tier budget was already spent.
    Exhausted { handler: String },
    /// The process failed and no registered handler recognized the output.
    Unrecognized { exit_code: Option<i32> },
    /// The process exited cleanly but expected output files are missing.
    MissingOutputs { files: Vec<String> },
    /// Precondition or configuration error; nothing was launched for it.
    Configuration(String),
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Exhausted { handler } => {
                write!(f, "handler '{handler}' exhausted its correction tiers")
            }
            FailureKind::Unrecognized { exit_code } => match exit_code {
                Some(code) => write!(f, "unrecognized failure (exit code {code})"),
                None => write!(f, "unrecognized failure (killed by signal)"),
            },
            FailureKind::MissingOutputs { files } => {
                write!(f, "expected output files missing: {}", files.join(", "))
            }
            FailureKind::Configuration(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

/// Structured cause attached to a failed [`JobResult`].
///
/// The correction history lives on the result itself; the cause carries the
/// classification and the tail of whatever the job last wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCause {
    pub kind: FailureKind,
    /// Bounded tail of the job's output at the time of failure.
    pub output_excerpt: Option<String>,
}

impl FailureCause {
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            output_excerpt: None,
        }
    }

    pub fn with_excerpt(kind: FailureKind, excerpt: impl Into<String>) -> Self {
        Self {
            kind,
            output_excerpt: Some(excerpt.into()),
        }
    }
}
