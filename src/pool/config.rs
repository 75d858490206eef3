//! Worker pool configuration.

use std::num::NonZeroUsize;

/// Default worker count.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Configuration for the background worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads.
    pub worker_threads: NonZeroUsize,
    /// Maximum queued jobs per worker.
    pub queue_size: usize,
    /// Stack size per thread in bytes (0 = platform default).
    pub stack_size: usize,
    /// Thread name prefix.
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: NonZeroUsize::new(DEFAULT_WORKER_THREADS)
                .unwrap_or(NonZeroUsize::MIN),
            queue_size: 256,
            stack_size: 0,
            thread_name_prefix: "tickloop-worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    /// Create config with specific thread count (at least one).
    pub fn with_threads(count: usize) -> Self {
        Self {
            worker_threads: NonZeroUsize::new(count).unwrap_or(NonZeroUsize::MIN),
            ..Default::default()
        }
    }

    /// One worker per logical CPU.
    pub fn per_cpu() -> Self {
        Self::with_threads(num_cpus::get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_four_workers() {
        let cfg = WorkerPoolConfig::default();
        assert_eq!(cfg.worker_threads.get(), 4);
        assert_eq!(cfg.queue_size, 256);
        assert_eq!(cfg.stack_size, 0);
    }

    #[test]
    fn test_with_threads_floors_at_one() {
        assert_eq!(WorkerPoolConfig::with_threads(0).worker_threads.get(), 1);
        assert_eq!(WorkerPoolConfig::with_threads(8).worker_threads.get(), 8);
    }

    #[test]
    fn test_per_cpu_is_nonzero() {
        assert!(WorkerPoolConfig::per_cpu().worker_threads.get() >= 1);
    }
}
