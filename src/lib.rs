//! simwatch — supervised execution and orchestration of long-running
//! simulation jobs.
//!
//! The engine watches a running job's output for known failure signatures,
//! mutates the job's control files, and restarts it until it completes or
//! the failure is fatal; the orchestration layer composes supervised jobs
//! into sequential chains, checkpoint-restart loops, and bounded parallel
//! fan-out/fan-in batches.

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod future;
pub mod handlers;
pub mod job;
pub mod monitor;
pub mod orchestrator;
pub mod ui;
