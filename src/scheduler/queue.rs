//! FIFO task queues with an optional depth bound.

use std::collections::VecDeque;

use super::error::SchedulerError;
use super::task::{Task, TaskKind};
use crate::telemetry;

/// Queue for one FIFO task kind (priority, microtask, check, close).
pub(crate) struct TaskQueue {
    kind: TaskKind,
    tasks: VecDeque<Task>,
    max_depth: Option<usize>,
}

impl TaskQueue {
    pub fn new(kind: TaskKind, max_depth: Option<usize>) -> Self {
        Self {
            kind,
            tasks: VecDeque::new(),
            max_depth,
        }
    }

    /// Append a task, rejecting it if the queue is at its bound.
    pub fn push(&mut self, task: Task) -> Result<(), SchedulerError> {
        if let Some(max) = self.max_depth {
            if self.tasks.len() >= max {
                return Err(SchedulerError::QueueOverflow {
                    kind: self.kind,
                    depth: self.tasks.len(),
                    max,
                });
            }
        }
        self.tasks.push_back(task);
        telemetry::record_queue_depth(self.kind, self.tasks.len());
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Task> {
        let task = self.tasks.pop_front();
        if task.is_some() {
            telemetry::record_queue_depth(self.kind, self.tasks.len());
        }
        task
    }

    /// Remove every queued task, cancelling its handle.
    pub fn discard(&mut self) -> usize {
        let count = self.tasks.len();
        for task in self.tasks.drain(..) {
            task.handle.cancel();
        }
        telemetry::record_queue_depth(self.kind, 0);
        count
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::{boxed, TaskHandle, TaskId};

    fn task(id: u64) -> Task {
        let handle = TaskHandle::new(TaskId::new(id), TaskKind::Check, false);
        Task::once(handle, boxed(|| ()), 0)
    }

    #[test]
    fn test_fifo_order() {
        let mut q = TaskQueue::new(TaskKind::Check, None);
        for id in 1..=3 {
            q.push(task(id)).unwrap();
        }
        let order: Vec<u64> = std::iter::from_fn(|| q.pop())
            .map(|t| t.handle.id().value())
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_depth_bound_rejects() {
        let mut q = TaskQueue::new(TaskKind::Check, Some(2));
        q.push(task(1)).unwrap();
        q.push(task(2)).unwrap();
        let err = q.push(task(3)).unwrap_err();
        assert_eq!(
            err,
            SchedulerError::QueueOverflow { kind: TaskKind::Check, depth: 2, max: 2 }
        );
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_discard_cancels_handles() {
        let mut q = TaskQueue::new(TaskKind::Check, None);
        let t = task(1);
        let handle = t.handle.clone();
        q.push(t).unwrap();
        assert_eq!(q.discard(), 1);
        assert!(q.is_empty());
        assert!(handle.is_cancelled());
    }
}
