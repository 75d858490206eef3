//! Metrics recorded through the `metrics` facade.
//!
//! The library never installs an exporter; without one these calls are
//! no-ops.

use std::time::Duration;

use crate::scheduler::TaskKind;

pub fn record_task_executed(kind: TaskKind) {
    metrics::counter!("tickloop_tasks_executed_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_task_failure(kind: TaskKind) {
    metrics::counter!("tickloop_task_failures_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_queue_depth(kind: TaskKind, depth: usize) {
    metrics::gauge!("tickloop_queue_depth", "kind" => kind.as_str()).set(depth as f64);
}

/// A pipe write crossed its high water mark.
pub fn record_backpressure() {
    metrics::counter!("tickloop_pipe_backpressure_total").increment(1);
}

pub fn record_worker_job(outcome: &'static str, elapsed: Duration) {
    metrics::counter!("tickloop_worker_jobs_total", "outcome" => outcome).increment(1);
    metrics::histogram!("tickloop_worker_job_seconds").record(elapsed.as_secs_f64());
}

/// Time a task spent queued before it started.
pub fn record_queue_wait(kind: TaskKind, wait_ms: u64) {
    metrics::histogram!("tickloop_task_queue_wait_ms", "kind" => kind.as_str()).record(wait_ms as f64);
}
