//! Pipeline composition over supervised jobs.
//!
//! A pipeline is a tree of [`Stage`]s rooted at one entry stage: sequential
//! chains where each job is built from the prior result, checkpoint-restart
//! loops, and parallel fan-out batches joined by a reducer. The
//! [`Orchestrator`] executes the tree, bounding simultaneous external
//! processes with one global semaphore and propagating abort to every
//! in-flight job.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::checkpoint::{Checkpoint, CheckpointLocator, IndexedFileLocator};
use crate::error::{FailureCause, FailureKind, SimwatchError};
use crate::job::{self, JobOutcome, JobResult, JobRunner, JobSpec};
use crate::monitor::wait_for_abort;

/// Builds a stage's job from the previous stage's result.
pub trait BuildJob: Send + Sync {
    fn build(&self, input: Option<&JobResult>) -> anyhow::Result<JobSpec>;
}

impl<F> BuildJob for F
where
    F: Fn(Option<&JobResult>) -> anyhow::Result<JobSpec> + Send + Sync,
{
    fn build(&self, input: Option<&JobResult>) -> anyhow::Result<JobSpec> {
        self(input)
    }
}

/// Builds one loop iteration from the iteration number (starting at 1), the
/// latest result, and the checkpoint discovered for iterations after the
/// first.
pub trait BuildIteration: Send + Sync {
    fn build(
        &self,
        iteration: u32,
        prev: Option<&JobResult>,
        checkpoint: Option<&Checkpoint>,
    ) -> anyhow::Result<JobSpec>;
}

impl<F> BuildIteration for F
where
    F: Fn(u32, Option<&JobResult>, Option<&Checkpoint>) -> anyhow::Result<JobSpec> + Send + Sync,
{
    fn build(
        &self,
        iteration: u32,
        prev: Option<&JobResult>,
        checkpoint: Option<&Checkpoint>,
    ) -> anyhow::Result<JobSpec> {
        self(iteration, prev, checkpoint)
    }
}

/// Stop predicate evaluated against each iteration's result.
pub trait StopWhen: Send + Sync {
    fn stop(&self, latest: &JobResult) -> bool;
}

impl<F> StopWhen for F
where
    F: Fn(&JobResult) -> bool + Send + Sync,
{
    fn stop(&self, latest: &JobResult) -> bool {
        self(latest)
    }
}

/// Aggregates a fan-out's terminal results.
///
/// Always invoked with exactly one result per branch — failed and aborted
/// branches included as markers — so the reducer decides whether a branch
/// failure is fatal to the batch. Returning a failed result fails the stage.
pub trait ReduceResults: Send + Sync {
    fn reduce(&self, results: Vec<JobResult>) -> anyhow::Result<JobResult>;
}

impl<F> ReduceResults for F
where
    F: Fn(Vec<JobResult>) -> anyhow::Result<JobResult> + Send + Sync,
{
    fn reduce(&self, results: Vec<JobResult>) -> anyhow::Result<JobResult> {
        self(results)
    }
}

/// One node of a pipeline tree.
pub enum Stage {
    /// A single job built from the prior stage's result.
    Job(Box<dyn BuildJob>),
    /// Ordered stages, each feeding the next; Failed/Aborted short-circuits.
    Sequential(Vec<Stage>),
    /// Independent branches joined by a reducer over all of them.
    FanOut {
        branches: Vec<Stage>,
        reduce: Box<dyn ReduceResults>,
    },
    /// Checkpoint-restart iteration of one job template.
    Loop {
        build: Box<dyn BuildIteration>,
        stop: Box<dyn StopWhen>,
        max_iterations: u32,
    },
}

impl Stage {
    pub fn job(build: impl BuildJob + 'static) -> Self {
        Stage::Job(Box::new(build))
    }

    pub fn sequential(stages: Vec<Stage>) -> Self {
        Stage::Sequential(stages)
    }

    pub fn fan_out(branches: Vec<Stage>, reduce: impl ReduceResults + 'static) -> Self {
        Stage::FanOut {
            branches,
            reduce: Box::new(reduce),
        }
    }

    pub fn repeat(
        build: impl BuildIteration + 'static,
        stop: impl StopWhen + 'static,
        max_iterations: u32,
    ) -> Self {
        Stage::Loop {
            build: Box::new(build),
            stop: Box::new(stop),
            max_iterations,
        }
    }
}

type StageFuture = Pin<Box<dyn Future<Output = Result<JobResult, SimwatchError>> + Send>>;

/// Executes pipeline trees against one [`JobRunner`].
///
/// Cheap to clone; all clones share the concurrency bound and the abort flag.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    runner: JobRunner,
    limit: Semaphore,
    checkpoints: Arc<dyn CheckpointLocator>,
    abort_tx: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(runner: JobRunner, max_parallel: usize) -> Self {
        Self::with_checkpoint_locator(
            runner,
            max_parallel,
            Arc::new(IndexedFileLocator::new("state.ckpt")),
        )
    }

    /// Constructs with a custom checkpoint discovery collaborator.
    pub fn with_checkpoint_locator(
        runner: JobRunner,
        max_parallel: usize,
        checkpoints: Arc<dyn CheckpointLocator>,
    ) -> Self {
        let (abort_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(OrchestratorInner {
                runner,
                limit: Semaphore::new(max_parallel.max(1)),
                checkpoints,
                abort_tx,
            }),
        }
    }

    /// Aborts every in-flight job and stops submitting new ones.
    pub fn abort(&self) {
        // send_replace updates the flag even when no job is subscribed yet.
        self.inner.abort_tx.send_replace(true);
    }

    fn is_aborted(&self) -> bool {
        *self.inner.abort_tx.borrow()
    }

    /// Runs a pipeline to completion, returning the entry stage's result.
    pub async fn run(&self, stage: Stage) -> Result<JobResult, SimwatchError> {
        self.clone().run_stage(stage, None).await
    }

    // Stages nest, so execution recurses through a boxed future.
    fn run_stage(self, stage: Stage, input: Option<JobResult>) -> StageFuture {
        Box::pin(async move {
            match stage {
                Stage::Job(build) => self.run_job(build.as_ref(), input.as_ref()).await,
                Stage::Sequential(stages) => {
                    let mut current = input;
                    for stage in stages {
                        let result = self.clone().run_stage(stage, current.take()).await?;
                        current = Some(result);
                    }
                    current.ok_or_else(|| SimwatchError::Config("empty sequential stage".into()))
                }
                Stage::FanOut { branches, reduce } => {
                    self.run_fanout(branches, reduce, input).await
                }
                Stage::Loop {
                    build,
                    stop,
                    max_iterations,
                } => {
                    self.run_loop(build.as_ref(), stop.as_ref(), max_iterations, input)
                        .await
                }
            }
        })
    }

    async fn run_job(
        &self,
        build: &dyn BuildJob,
        input: Option<&JobResult>,
    ) -> Result<JobResult, SimwatchError> {
        let spec = build
            .build(input)
            .map_err(|e| SimwatchError::Config(e.to_string()))?;
        self.execute(spec).await
    }

    /// Runs one job under the global concurrency bound. The bound only
    /// changes wall-clock behavior, never results.
    async fn execute(&self, spec: JobSpec) -> Result<JobResult, SimwatchError> {
        if self.is_aborted() {
            return Err(SimwatchError::JobAborted(Box::new(aborted_marker(&spec))));
        }

        let _permit = self
            .inner
            .limit
            .acquire()
            .await
            .map_err(|_| SimwatchError::Config("concurrency limit closed".into()))?;

        if self.is_aborted() {
            return Err(SimwatchError::JobAborted(Box::new(aborted_marker(&spec))));
        }

        let future = self.inner.runner.submit(spec)?;
        let mut abort_rx = self.inner.abort_tx.subscribe();

        let result = tokio::select! {
            result = future.wait() => result,
            _ = wait_for_abort(&mut abort_rx) => {
                future.abort();
                future.wait().await
            }
        };

        match result.outcome {
            JobOutcome::Succeeded => Ok(result),
            JobOutcome::Failed(_) => Err(SimwatchError::JobFailed(Box::new(result))),
            JobOutcome::Aborted => Err(SimwatchError::JobAborted(Box::new(result))),
        }
    }

    async fn run_fanout(
        &self,
        branches: Vec<Stage>,
        reduce: Box<dyn ReduceResults>,
        input: Option<JobResult>,
    ) -> Result<JobResult, SimwatchError> {
        let total = branches.len();
        if total == 0 {
            return Err(SimwatchError::Config("fan-out with no branches".into()));
        }

        let mut set = JoinSet::new();
        for (index, branch) in branches.into_iter().enumerate() {
            let orchestrator = self.clone();
            let input = input.clone();
            set.spawn(async move { (index, orchestrator.run_stage(branch, input).await) });
        }

        // Fan-in observes every branch terminal before reducing; one
        // branch's failure never hides its siblings' results.
        let mut slots: Vec<Option<JobResult>> = vec![None; total];
        while let Some(joined) = set.join_next().await {
            if let Ok((index, outcome)) = joined {
                slots[index] = Some(match outcome {
                    Ok(result) => result,
                    Err(error) => failure_marker(error),
                });
            }
        }
        let results: Vec<JobResult> = slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(panicked_marker))
            .collect();

        let reduced = reduce
            .reduce(results)
            .map_err(|e| SimwatchError::Config(format!("fan-in reducer failed: {e}")))?;

        match reduced.outcome {
            JobOutcome::Succeeded => Ok(reduced),
            JobOutcome::Failed(_) => Err(SimwatchError::JobFailed(Box::new(reduced))),
            JobOutcome::Aborted => Err(SimwatchError::JobAborted(Box::new(reduced))),
        }
    }

    async fn run_loop(
        &self,
        build: &dyn BuildIteration,
        stop: &dyn StopWhen,
        max_iterations: u32,
        input: Option<JobResult>,
    ) -> Result<JobResult, SimwatchError> {
        if max_iterations == 0 {
            return Err(SimwatchError::Config("loop with zero iterations".into()));
        }

        let mut latest: Option<JobResult> = None;

        for iteration in 1..=max_iterations {
            let checkpoint = match latest.as_ref() {
                // The previous iteration must have left a restart artifact;
                // resuming from scratch silently would discard its work.
                Some(previous) => {
                    let dir = previous.working_dir.clone();
                    let found = self.inner.checkpoints.latest(&dir).map_err(|e| {
                        SimwatchError::Config(format!("checkpoint discovery failed: {e}"))
                    })?;
                    match found {
                        Some(checkpoint) => {
                            job::setup_restart(&dir)?;
                            Some(checkpoint)
                        }
                        None => return Err(SimwatchError::CheckpointNotFound(dir)),
                    }
                }
                None => None,
            };

            let prev = latest.as_ref().or(input.as_ref());
            let spec = build
                .build(iteration, prev, checkpoint.as_ref())
                .map_err(|e| SimwatchError::Config(e.to_string()))?;
            let result = self.execute(spec).await?;

            let done = stop.stop(&result);
            latest = Some(result);
            if done {
                break;
            }
        }

        latest.ok_or_else(|| SimwatchError::Config("loop produced no result".into()))
    }
}

// A branch that failed before producing a result still owes fan-in a marker.
fn failure_marker(error: SimwatchError) -> JobResult {
    let message = error.to_string();
    match error.into_job_result() {
        Some(result) => result,
        None => synthetic_failed(message),
    }
}

fn panicked_marker() -> JobResult {
    synthetic_failed("fan-out branch task panicked".to_string())
}

fn synthetic_failed(message: String) -> JobResult {
    let now = Utc::now();
    JobResult {
        job_id: Uuid::new_v4().to_string(),
        name: "fan-out branch".into(),
        outcome: JobOutcome::Failed(FailureCause::new(FailureKind::Configuration(message))),
        handle: None,
        corrections: Vec::new(),
        exit_code: None,
        working_dir: PathBuf::new(),
        started_at: now,
        finished_at: now,
    }
}

fn aborted_marker(spec: &JobSpec) -> JobResult {
    let now = Utc::now();
    JobResult {
        job_id: Uuid::new_v4().to_string(),
        name: spec.name.clone(),
        outcome: JobOutcome::Aborted,
        handle: None,
        corrections: Vec::new(),
        exit_code: None,
        working_dir: spec.working_dir.clone(),
        started_at: now,
        finished_at: now,
    }
}
