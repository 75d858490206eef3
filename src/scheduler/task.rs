//! Tasks, task handles and task outcomes.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use super::error::SchedulerError;

/// Identity of a scheduled task. Unique per scheduler, increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Class of deferred work. Determines which queue holds the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// The program body passed to `run_with`.
    Main,
    Priority,
    Microtask,
    Timer,
    Completion,
    Check,
    Close,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Priority => "priority",
            Self::Microtask => "microtask",
            Self::Timer => "timer",
            Self::Completion => "completion",
            Self::Check => "check",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a task as seen through its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Cancelled,
    Done,
}

/// Failure of a single task action. Routed to the unhandled-error hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFailure {
    #[error("task returned error: {0}")]
    Error(String),

    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Return type accepted from task actions.
///
/// Actions may return `()` or any `Result<(), E>` whose error is displayable.
pub trait TaskOutcome {
    fn into_outcome(self) -> Result<(), TaskFailure>;
}

impl TaskOutcome for () {
    fn into_outcome(self) -> Result<(), TaskFailure> {
        Ok(())
    }
}

impl<E: fmt::Display> TaskOutcome for Result<(), E> {
    fn into_outcome(self) -> Result<(), TaskFailure> {
        self.map_err(|e| TaskFailure::Error(e.to_string()))
    }
}

/// Cancellable reference to a scheduled task.
///
/// Handles are cheap to clone and live on the loop thread only.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    kind: TaskKind,
    repeating: bool,
    state: Rc<Cell<TaskState>>,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state.get())
            .finish()
    }
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, kind: TaskKind, repeating: bool) -> Self {
        Self {
            id,
            kind,
            repeating,
            state: Rc::new(Cell::new(TaskState::Pending)),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.get() == TaskState::Cancelled
    }

    pub fn is_pending(&self) -> bool {
        self.state.get() == TaskState::Pending
    }

    /// Has the action run to completion (one-shot tasks only).
    pub fn is_done(&self) -> bool {
        self.state.get() == TaskState::Done
    }

    /// Cancel the task. Returns `true` if this call prevented a future run.
    ///
    /// A no-op returning `false` once a one-shot task has started. A
    /// repeating timer can be cancelled from inside its own action, which
    /// stops it from re-arming.
    pub fn cancel(&self) -> bool {
        match self.state.get() {
            TaskState::Pending => {
                self.state.set(TaskState::Cancelled);
                true
            }
            TaskState::Running if self.repeating => {
                self.state.set(TaskState::Cancelled);
                true
            }
            _ => false,
        }
    }

    /// Strict variant of [`cancel`](Self::cancel).
    ///
    /// Cancelling twice is fine; cancelling a task that already ran (or is
    /// running) is `InvalidState`.
    pub fn try_cancel(&self) -> Result<(), SchedulerError> {
        if self.cancel() || self.is_cancelled() {
            return Ok(());
        }
        Err(SchedulerError::InvalidState(format!(
            "{} {} already {}",
            self.kind,
            self.id,
            if self.state.get() == TaskState::Running { "running" } else { "executed" },
        )))
    }

    /// Transition to running. Returns `false` if the task was cancelled.
    pub(crate) fn begin(&self) -> bool {
        if self.state.get() != TaskState::Pending {
            return false;
        }
        self.state.set(TaskState::Running);
        true
    }

    /// Transition out of running. Repeating tasks go back to pending.
    pub(crate) fn finish(&self) {
        if self.state.get() == TaskState::Running {
            let next = if self.repeating { TaskState::Pending } else { TaskState::Done };
            self.state.set(next);
        }
    }
}

pub(crate) type Action = Box<dyn FnOnce() -> Result<(), TaskFailure>>;
pub(crate) type RepeatAction = Box<dyn FnMut() -> Result<(), TaskFailure>>;

pub(crate) fn boxed<F, R>(action: F) -> Action
where
    F: FnOnce() -> R + 'static,
    R: TaskOutcome,
{
    Box::new(move || action().into_outcome())
}

pub(crate) fn boxed_repeat<F, R>(mut action: F) -> RepeatAction
where
    F: FnMut() -> R + 'static,
    R: TaskOutcome,
{
    Box::new(move || action().into_outcome())
}

pub(crate) enum TaskBody {
    Once(Action),
    Repeat { period_ms: u64, action: RepeatAction },
}

/// A queued unit of work. Owned by exactly one queue until executed.
pub(crate) struct Task {
    pub handle: TaskHandle,
    pub body: TaskBody,
    pub enqueued_at: u64,
}

impl Task {
    pub fn once(handle: TaskHandle, action: Action, enqueued_at: u64) -> Self {
        Self { handle, body: TaskBody::Once(action), enqueued_at }
    }

    pub fn repeating(
        handle: TaskHandle,
        period_ms: u64,
        action: RepeatAction,
        enqueued_at: u64,
    ) -> Self {
        Self {
            handle,
            body: TaskBody::Repeat { period_ms, action },
            enqueued_at,
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
