//! Monotonic time sources for the drain loop.
//!
//! The scheduler only ever asks "what time is it" in whole milliseconds
//! relative to an arbitrary origin. Timers compare against that value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Millisecond time source.
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed since the clock's origin. Never decreases.
    fn now_ms(&self) -> u64;

    /// Jump forward to `deadline_ms` instead of sleeping.
    ///
    /// Returns `true` if the clock moved (virtual clocks), `false` if the
    /// caller must actually wait (wall clocks).
    fn skip_to(&self, _deadline_ms: u64) -> bool {
        false
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn skip_to(&self, deadline_ms: u64) -> bool {
        (**self).skip_to(deadline_ms)
    }
}

/// Wall clock backed by `Instant`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually driven clock for deterministic runs.
///
/// When the loop has nothing to do but wait for a timer, it calls
/// [`Clock::skip_to`] and time jumps straight to the deadline.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    pub fn new(start_ms: u64) -> Self {
        Self { now: AtomicU64::new(start_ms) }
    }

    /// Advance by `ms` milliseconds.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the absolute time. Ignored if it would move backwards.
    pub fn set(&self, ms: u64) {
        self.now.fetch_max(ms, Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn skip_to(&self, deadline_ms: u64) -> bool {
        self.set(deadline_ms);
        true
    }
}
