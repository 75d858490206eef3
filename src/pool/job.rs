//! Worker jobs, job handles and job outcomes.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Identity of a submitted worker job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

impl JobId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Why a job did not produce a value. Delivered as the `Err` side of the
/// completion result, never raised on the loop thread.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    Failed(String),

    #[error("Job panicked: {0}")]
    Panicked(String),

    #[error("Job timed out after {0}ms")]
    TimedOut(u64),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Worker pool is shut down")]
    PoolShutdown,
}

/// Type-erased job result carried across the thread boundary.
pub type JobOutput = Result<Box<dyn Any + Send>, WorkerError>;

/// A blocking unit of work handed to exactly one worker.
pub struct WorkerJob {
    pub id: JobId,
    pub(crate) cancelled: Arc<AtomicBool>,
    pub(crate) run: Box<dyn FnOnce() -> JobOutput + Send>,
}

impl fmt::Debug for WorkerJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerJob")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl WorkerJob {
    /// Wrap a fallible blocking closure. Errors are stringified on the
    /// worker thread so `E` never crosses threads.
    pub fn new<T, E, F>(id: JobId, cancelled: Arc<AtomicBool>, job: F) -> Self
    where
        T: Send + 'static,
        E: fmt::Display,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        Self {
            id,
            cancelled,
            run: Box::new(move || {
                job()
                    .map(|v| Box::new(v) as Box<dyn Any + Send>)
                    .map_err(|e| WorkerError::Failed(e.to_string()))
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Cancellable reference to a submitted job.
///
/// Cancellation is best-effort: a job already running keeps running on its
/// worker, only its completion is dropped.
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    cancelled: Arc<AtomicBool>,
    delivered: Rc<Cell<bool>>,
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .field("delivered", &self.is_delivered())
            .finish()
    }
}

impl JobHandle {
    pub(crate) fn new(id: JobId) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
            delivered: Rc::new(Cell::new(false)),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Stop the completion from being scheduled. Returns `true` if this call
    /// changed anything; `false` once the completion has been delivered.
    pub fn cancel(&self) -> bool {
        if self.delivered.get() {
            return false;
        }
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Has the completion task been handed to the loop.
    pub fn is_delivered(&self) -> bool {
        self.delivered.get()
    }

    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub(crate) fn mark_delivered(&self) {
        self.delivered.set(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_maps_error_to_failed() {
        let job = WorkerJob::new(JobId::new(1), Arc::new(AtomicBool::new(false)), || {
            Err::<u32, _>("disk on fire")
        });
        let out = (job.run)();
        assert_eq!(out.err(), Some(WorkerError::Failed("disk on fire".into())));
    }

    #[test]
    fn test_job_boxes_value() {
        let job = WorkerJob::new(JobId::new(2), Arc::new(AtomicBool::new(false)), || {
            Ok::<_, String>(41u32 + 1)
        });
        let out = (job.run)().unwrap();
        assert_eq!(*out.downcast::<u32>().unwrap(), 42);
    }

    #[test]
    fn test_handle_cancel_shares_flag_with_job() {
        let handle = JobHandle::new(JobId::new(3));
        let job = WorkerJob::new(JobId::new(3), handle.cancel_flag(), || Ok::<_, String>(()));
        assert!(!job.is_cancelled());
        assert!(handle.cancel());
        assert!(job.is_cancelled());
        assert!(!handle.cancel(), "second cancel changes nothing");
    }

    #[test]
    fn test_cancel_after_delivery_is_noop() {
        let handle = JobHandle::new(JobId::new(4));
        handle.mark_delivered();
        assert!(!handle.cancel());
        assert!(!handle.is_cancelled());
    }
}
