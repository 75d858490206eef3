//! Completion queue: the only channel from workers back to the loop thread.
//!
//! Many workers push, the loop thread pops. The loop also parks here while
//! idle, so pushes and shutdown requests double as wake-ups.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::job::{JobId, JobOutput};

/// A finished job waiting to become a Completion task.
pub struct Completion {
    pub job_id: JobId,
    pub outcome: JobOutput,
    pub elapsed: Duration,
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("job_id", &self.job_id)
            .field("ok", &self.outcome.is_ok())
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

struct QueueState {
    items: VecDeque<Completion>,
    wake_pending: bool,
}

/// Lock-based MPSC queue with a blocking wait.
pub struct CompletionQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                wake_pending: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Push a completion and wake the loop. Callable from any thread.
    pub fn push(&self, completion: Completion) {
        self.state.lock().items.push_back(completion);
        self.ready.notify_one();
    }

    pub fn try_pop(&self) -> Option<Completion> {
        self.state.lock().items.pop_front()
    }

    /// Interrupt a waiting loop without delivering anything.
    pub fn wake(&self) {
        self.state.lock().wake_pending = true;
        self.ready.notify_all();
    }

    /// Block until a completion or wake-up arrives, or `timeout` elapses.
    ///
    /// Returns `true` if woken by a push or [`wake`](Self::wake).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.items.is_empty() && !state.wake_pending {
            let _ = self.ready.wait_for(&mut state, timeout);
        }
        let woken = !state.items.is_empty() || state.wake_pending;
        state.wake_pending = false;
        woken
    }

    /// Block until a completion or wake-up arrives.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.wake_pending {
            self.ready.wait(&mut state);
        }
        state.wake_pending = false;
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}
