//! Timer queue: a min-heap ordered by deadline, stable on ties.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::error::SchedulerError;
use super::task::{Task, TaskKind};
use crate::telemetry;

/// Heap entry for a timer task.
struct TimerEntry {
    ready_at: u64,
    sequence: u64,
    task: Task,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.sequence == other.sequence
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // Reversed: BinaryHeap is a max-heap, earliest deadline must pop first.
    fn cmp(&self, other: &Self) -> Ordering {
        match other.ready_at.cmp(&self.ready_at) {
            Ordering::Equal => other.sequence.cmp(&self.sequence), // Lower sequence = earlier
            ord => ord,
        }
    }
}

/// Timer tasks keyed by `(ready_at, sequence)`.
pub(crate) struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    next_sequence: u64,
    max_depth: Option<usize>,
}

impl TimerQueue {
    pub fn new(max_depth: Option<usize>) -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_sequence: 0,
            max_depth,
        }
    }

    pub fn push(&mut self, task: Task, ready_at: u64) -> Result<(), SchedulerError> {
        if let Some(max) = self.max_depth {
            if self.heap.len() >= max {
                return Err(SchedulerError::QueueOverflow {
                    kind: TaskKind::Timer,
                    depth: self.heap.len(),
                    max,
                });
            }
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(TimerEntry { ready_at, sequence, task });
        telemetry::record_queue_depth(TaskKind::Timer, self.heap.len());
        Ok(())
    }

    /// Sequence the next pushed timer will get. Used as a phase cutoff.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Pop the earliest timer if it is due at `now` and was pushed before
    /// `cutoff`. Timers armed during the current phase wait for the next one.
    pub fn pop_due(&mut self, now: u64, cutoff: u64) -> Option<Task> {
        let due = self
            .heap
            .peek()
            .map_or(false, |e| e.ready_at <= now && e.sequence < cutoff);
        if !due {
            return None;
        }
        let entry = self.heap.pop()?;
        telemetry::record_queue_depth(TaskKind::Timer, self.heap.len());
        Some(entry.task)
    }

    /// Earliest deadline among live (not cancelled) timers.
    pub fn next_deadline(&mut self) -> Option<u64> {
        self.prune_cancelled();
        self.heap.peek().map(|e| e.ready_at)
    }

    /// True if any live timer remains.
    pub fn has_live(&mut self) -> bool {
        self.next_deadline().is_some()
    }

    /// Drop cancelled timers sitting at the top of the heap. After this the
    /// top, if any, is the earliest live timer.
    fn prune_cancelled(&mut self) {
        while self.heap.peek().map_or(false, |e| e.task.handle.is_cancelled()) {
            self.heap.pop();
        }
    }

    /// Remove every timer, cancelling its handle.
    pub fn discard(&mut self) -> usize {
        let count = self.heap.len();
        for entry in self.heap.drain() {
            entry.task.handle.cancel();
        }
        telemetry::record_queue_depth(TaskKind::Timer, 0);
        count
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
