//! Pipe error types.

use thiserror::Error;

use crate::scheduler::SchedulerError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipeError {
    #[error("Write after end")]
    WriteAfterEnd,

    #[error("Pipe already ended")]
    AlreadyEnded,

    /// The consumer rejected or panicked on a chunk.
    #[error("Malformed chunk: {0}")]
    MalformedChunk(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}
