//! Background worker pool.
//!
//! The only place real parallelism exists. Workers run blocking jobs and
//! hand their outcomes to the scheduler through a completion queue.

mod completion;
mod config;
mod job;
mod worker;

pub use completion::{Completion, CompletionQueue};
pub use config::{WorkerPoolConfig, DEFAULT_WORKER_THREADS};
pub use job::{JobHandle, JobId, JobOutput, WorkerError, WorkerJob};
pub use worker::{PoolError, PoolStats, WorkerPool};
