//! Task scheduling.
//!
//! The [`Scheduler`] owns the priority, microtask, timer, check and close
//! queues and drives them on a single thread. Blocking work goes to the
//! worker pool through [`Scheduler::submit`].

mod error;
mod event_loop;
mod queue;
mod stats;
mod task;
mod timer;

pub use error::SchedulerError;
pub use event_loop::{Scheduler, SchedulerConfig};
pub use stats::SchedulerStats;
pub use task::{TaskFailure, TaskHandle, TaskId, TaskKind, TaskOutcome, TaskState};

pub(crate) use task::panic_message;
