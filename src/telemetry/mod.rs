//! Telemetry: structured logging, task spans and metrics.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    record_backpressure, record_queue_depth, record_queue_wait, record_task_executed,
    record_task_failure, record_worker_job,
};
pub use spans::{SpanExt, TaskSpan};
