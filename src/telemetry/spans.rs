//! Span utilities for task execution.

use tracing::{debug_span, Span};

use crate::scheduler::{TaskId, TaskKind};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for the span wrapping one executed task.
pub struct TaskSpan;

impl TaskSpan {
    /// Fields: `task_id`, `kind`, plus `status` and `error.message` filled in
    /// by [`SpanExt::record_result`].
    pub fn new(kind: TaskKind, id: TaskId) -> Span {
        debug_span!(
            "task",
            task_id = id.value(),
            kind = kind.as_str(),
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}
