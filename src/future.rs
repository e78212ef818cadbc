//! Asynchronous handles to submitted jobs.
//!
//! A [`JobFuture`] is returned immediately on submission and tracks the job
//! through `Pending → Running → {Succeeded, Failed, Aborted}`. Exactly one
//! writer — the monitor loop driving the job — transitions it; any number of
//! cloned readers may poll or block-wait without triggering duplicate work.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{FailureCause, FailureKind, SimwatchError};
use crate::job::{JobOutcome, JobResult};

/// Lifecycle state of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FutureState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl FutureState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FutureState::Succeeded | FutureState::Failed | FutureState::Aborted
        )
    }
}

impl std::fmt::Display for FutureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FutureState::Pending => write!(f, "PENDING"),
            FutureState::Running => write!(f, "RUNNING"),
            FutureState::Succeeded => write!(f, "SUCCEEDED"),
            FutureState::Failed => write!(f, "FAILED"),
            FutureState::Aborted => write!(f, "ABORTED"),
        }
    }
}

#[derive(Debug)]
struct Shared {
    result: Mutex<Option<JobResult>>,
    // Enough identity to synthesize a terminal result if the monitor task
    // dies without resolving.
    job_id: String,
    name: String,
    working_dir: PathBuf,
}

impl Shared {
    fn lock_result(&self) -> std::sync::MutexGuard<'_, Option<JobResult>> {
        self.result.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn synthetic_failure(&self) -> JobResult {
        let now = Utc::now();
        JobResult {
            job_id: self.job_id.clone(),
            name: self.name.clone(),
            outcome: JobOutcome::Failed(FailureCause::new(FailureKind::Configuration(
                "monitor task terminated without resolving the job".into(),
            ))),
            handle: None,
            corrections: Vec::new(),
            exit_code: None,
            working_dir: self.working_dir.clone(),
            started_at: now,
            finished_at: now,
        }
    }
}

/// Readable handle to a submitted job. Cloneable; all clones observe the same
/// single execution.
#[derive(Clone, Debug)]
pub struct JobFuture {
    state: watch::Receiver<FutureState>,
    abort: Arc<watch::Sender<bool>>,
    shared: Arc<Shared>,
}

impl JobFuture {
    /// Creates the future, its single writer, and the abort signal the
    /// monitor loop selects on.
    pub(crate) fn new(
        job_id: &str,
        name: &str,
        working_dir: &Path,
    ) -> (JobFuture, FutureWriter, watch::Receiver<bool>) {
        let (state_tx, state_rx) = watch::channel(FutureState::Pending);
        let (abort_tx, abort_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            result: Mutex::new(None),
            job_id: job_id.to_string(),
            name: name.to_string(),
            working_dir: working_dir.to_path_buf(),
        });

        let future = JobFuture {
            state: state_rx,
            abort: Arc::new(abort_tx),
            shared: shared.clone(),
        };
        let writer = FutureWriter {
            state: state_tx,
            shared,
        };
        (future, writer, abort_rx)
    }

    /// Non-blocking state query.
    pub fn poll(&self) -> FutureState {
        *self.state.borrow()
    }

    /// Requests cancellation. The monitor kills the process and resolves the
    /// future Aborted; no correction is attempted.
    pub fn abort(&self) {
        // send_replace updates the value even if the monitor already hung up.
        self.abort.send_replace(true);
    }

    /// Blocks until the job reaches a terminal state and returns its result,
    /// whatever the outcome. Fan-in joins use this so failed branches still
    /// yield a result marker.
    pub async fn wait(&self) -> JobResult {
        let mut rx = self.state.clone();
        // wait_for checks the current value first, so a future that is
        // already terminal returns immediately. An error means the writer
        // was dropped mid-flight.
        if rx.wait_for(|s| s.is_terminal()).await.is_err() {
            let mut slot = self.shared.lock_result();
            if slot.is_none() {
                *slot = Some(self.shared.synthetic_failure());
            }
        }
        self.shared
            .lock_result()
            .clone()
            .unwrap_or_else(|| self.shared.synthetic_failure())
    }

    /// Blocks until terminal; returns the result on success or raises the
    /// carried failure.
    pub async fn result(&self) -> Result<JobResult, SimwatchError> {
        let result = self.wait().await;
        match result.outcome {
            JobOutcome::Succeeded => Ok(result),
            JobOutcome::Failed(_) => Err(SimwatchError::JobFailed(Box::new(result))),
            JobOutcome::Aborted => Err(SimwatchError::JobAborted(Box::new(result))),
        }
    }
}

/// Write side of a [`JobFuture`]; owned by exactly one monitor loop.
pub(crate) struct FutureWriter {
    state: watch::Sender<FutureState>,
    shared: Arc<Shared>,
}

impl FutureWriter {
    pub(crate) fn set_running(&self) {
        let _ = self.state.send(FutureState::Running);
    }

    /// Resolves the future exactly once. The result is stored before the
    /// state flips terminal, so readers woken by the transition always see it.
    pub(crate) fn resolve(&self, result: JobResult) {
        let state = match result.outcome {
            JobOutcome::Succeeded => FutureState::Succeeded,
            JobOutcome::Failed(_) => FutureState::Failed,
            JobOutcome::Aborted => FutureState::Aborted,
        };
        *self.shared.lock_result() = Some(result);
        let _ = self.state.send(state);
    }
}
