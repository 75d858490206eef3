//! tickloop
//!
//! A single-threaded, phase-ordered event loop with a background worker pool
//! and backpressured pipes.
//!
//! # Phases
//!
//! Every pass of the loop drains the priority tier (priority tasks, then
//! microtasks) and then runs, in order:
//!
//! - **Timers**: due timers, earliest deadline first
//! - **Completions**: at most one worker-pool result
//! - **Checks**: tasks queued for "after I/O"
//!
//! The priority tier is drained again after every unit of work. Close tasks
//! run once when the loop terminates.
//!
//! # Threads
//!
//! All tasks run on the thread calling [`Scheduler::run`]. Only jobs
//! submitted with [`Scheduler::submit`] run elsewhere, on the worker pool,
//! and their results come back as completion tasks.
//!
//! ```no_run
//! use tickloop::{Runtime, RuntimeConfig};
//!
//! let runtime = Runtime::new(RuntimeConfig::default());
//! let sched = runtime.scheduler.clone();
//! runtime
//!     .scheduler
//!     .schedule_after(10, move || {
//!         sched.schedule_now(|| println!("after the timer")).map(|_| ())
//!     })
//!     .unwrap();
//! runtime.run().unwrap();
//! ```

pub mod cli;
pub mod clock;
pub mod config;
pub mod pipe;
pub mod pool;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;

use std::sync::Arc;

pub use clock::{Clock, MonotonicClock, VirtualClock};
pub use pipe::{Chunk, Pipe, PipeConfig, PipeError, Record};
pub use pool::{JobHandle, JobId, PoolError, PoolStats, WorkerError, WorkerPoolConfig};
pub use scheduler::{
    Scheduler, SchedulerConfig, SchedulerError, SchedulerStats, TaskFailure, TaskHandle, TaskId,
    TaskKind, TaskOutcome, TaskState,
};
pub use shutdown::{ShutdownHandle, ShutdownState, Termination};

/// Runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerConfig,
    /// Water marks used by [`Runtime::pipe`].
    pub pipe: PipeConfig,
}

impl From<config::EnvConfig> for RuntimeConfig {
    fn from(env: config::EnvConfig) -> Self {
        Self {
            scheduler: env.scheduler,
            pipe: env.pipe,
        }
    }
}

/// A scheduler bundled with default pipe settings.
#[derive(Debug, Clone)]
pub struct Runtime {
    pub scheduler: Scheduler,
    pub config: RuntimeConfig,
}

impl Runtime {
    /// Create a new runtime instance with the given configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            scheduler: Scheduler::new(config.scheduler.clone()),
            config,
        }
    }

    /// Create a runtime driven by `clock` instead of the wall clock.
    pub fn with_clock(config: RuntimeConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            scheduler: Scheduler::with_clock(config.scheduler.clone(), clock),
            config,
        }
    }

    /// Create a runtime from `TICKLOOP_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(config::load().into())
    }

    /// Create a pipe on this runtime's scheduler with the configured water
    /// marks.
    pub fn pipe<T, F, R>(&self, consumer: F) -> Pipe<T>
    where
        T: Chunk,
        F: FnMut(T) -> R + 'static,
        R: TaskOutcome,
    {
        Pipe::new(&self.scheduler, self.config.pipe, consumer)
    }

    /// Drive the loop until it terminates.
    pub fn run(&self) -> Result<Termination, SchedulerError> {
        self.scheduler.run()
    }
}
