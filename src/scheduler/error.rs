//! Scheduler error types.

use thiserror::Error;

use super::task::TaskKind;
use crate::pool::PoolError;

/// Errors surfaced to callers of the scheduling API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{kind} queue overflow: {depth}/{max} tasks")]
    QueueOverflow {
        kind: TaskKind,
        depth: usize,
        max: usize,
    },

    #[error("Scheduler is shut down")]
    ShutDown,

    #[error("Worker pool error: {0}")]
    Pool(PoolError),
}

impl SchedulerError {
    /// Returns true if the caller may retry after the loop makes progress.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueueOverflow { .. })
    }
}

impl From<PoolError> for SchedulerError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::PoolShutdown => Self::ShutDown,
            PoolError::QueueFull { depth, max } => Self::QueueOverflow {
                kind: TaskKind::Completion,
                depth,
                max,
            },
            other => Self::Pool(other),
        }
    }
}
