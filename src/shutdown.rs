//! Shutdown coordination for the drain loop.
//!
//! A state machine shared between the loop thread and any thread holding a
//! [`ShutdownHandle`]. Requesting shutdown wakes an idle loop.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::pool::CompletionQueue;

/// Shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

impl ShutdownState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// How a call to `run` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every queue emptied and no job was outstanding.
    Natural,
    /// `shutdown` was requested; only close tasks ran.
    Forced,
}

/// Thread-safe handle for requesting loop shutdown.
#[derive(Clone)]
pub struct ShutdownHandle {
    state: Arc<AtomicU8>,
    waker: Arc<CompletionQueue>,
}

impl ShutdownHandle {
    pub(crate) fn new(waker: Arc<CompletionQueue>) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ShutdownState::Running as u8)),
            waker,
        }
    }

    /// Get current shutdown state.
    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Check if the loop still accepts new work.
    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Request shutdown. Returns `false` if already requested.
    pub fn request(&self) -> bool {
        let moved = self
            .state
            .compare_exchange(
                ShutdownState::Running as u8,
                ShutdownState::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if moved {
            tracing::info!("shutdown requested");
            self.waker.wake();
        }
        moved
    }

    pub(crate) fn mark_stopped(&self) {
        self.state.store(ShutdownState::Stopped as u8, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle").field("state", &self.state()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn handle() -> (ShutdownHandle, Arc<CompletionQueue>) {
        let queue = Arc::new(CompletionQueue::new());
        (ShutdownHandle::new(Arc::clone(&queue)), queue)
    }

    #[test]
    fn test_initial_state_is_running() {
        let (h, _) = handle();
        assert_eq!(h.state(), ShutdownState::Running);
        assert!(h.is_accepting());
    }

    #[test]
    fn test_request_transitions_once() {
        let (h, _) = handle();
        assert!(h.request());
        assert_eq!(h.state(), ShutdownState::Draining);
        assert!(!h.request());
        assert!(!h.is_accepting());
        h.mark_stopped();
        assert_eq!(h.state(), ShutdownState::Stopped);
    }

    #[test]
    fn test_request_from_other_thread_wakes_waiter() {
        let (h, queue) = handle();
        let remote = h.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            remote.request();
        });
        assert!(queue.wait_timeout(Duration::from_secs(5)));
        assert_eq!(h.state(), ShutdownState::Draining);
        t.join().unwrap();
    }
}
