//! Runtime configuration loading from environment variables.
//!
//! All configuration values are loaded from `TICKLOOP_*` environment variables
//! with sensible defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `TICKLOOP_WORKER_THREADS` | 4 | Worker pool size (0 = one per CPU) |
//! | `TICKLOOP_WORKER_QUEUE_SIZE` | 256 | Per-worker job queue bound |
//! | `TICKLOOP_MAX_QUEUE_DEPTH` | 0 | Per-kind task queue bound (0 = unbounded) |
//! | `TICKLOOP_MAX_PRIORITY_DRAIN` | 0 | Priority drain bound (0 = unbounded) |
//! | `TICKLOOP_HIGH_WATER_MARK` | 16384 | Default pipe high water mark |
//! | `TICKLOOP_LOW_WATER_MARK` | 4096 | Default pipe low water mark (clamped to high) |
//! | `TICKLOOP_LOG` | info | Log filter directive |
//! | `TICKLOOP_LOG_FORMAT` | pretty | `json` or `pretty` |
//! | `TICKLOOP_LOG_FILE` | unset | Write logs to this file instead of stderr |

use std::path::PathBuf;

use serde::Serialize;

use crate::pipe::{PipeConfig, DEFAULT_HIGH_WATER_MARK, DEFAULT_LOW_WATER_MARK};
use crate::pool::{WorkerPoolConfig, DEFAULT_WORKER_THREADS};
use crate::scheduler::SchedulerConfig;
use crate::telemetry::{LogConfig, LogFormat};

/// Effective runtime configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub worker_threads: usize,
    pub worker_queue_size: usize,
    pub max_queue_depth: Option<usize>,
    pub max_priority_drain: Option<usize>,
    pub high_water_mark: usize,
    pub low_water_mark: usize,
    pub log_level: String,
    pub log_format: &'static str,
    pub log_file: Option<PathBuf>,
}

/// All runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub scheduler: SchedulerConfig,
    pub pipe: PipeConfig,
    pub log: LogConfig,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a bound where 0 (or missing) means unbounded.
fn parse_bound(key: &str) -> Option<usize> {
    Some(parse_usize(key, 0)).filter(|&n| n > 0)
}

/// Load worker pool configuration from environment.
fn load_worker_pool_config() -> WorkerPoolConfig {
    let threads = parse_usize("TICKLOOP_WORKER_THREADS", DEFAULT_WORKER_THREADS);
    let queue_size = parse_usize("TICKLOOP_WORKER_QUEUE_SIZE", 256).max(1);
    let base = if threads == 0 {
        WorkerPoolConfig::per_cpu()
    } else {
        WorkerPoolConfig::with_threads(threads.min(1024))
    };
    WorkerPoolConfig { queue_size, ..base }
}

/// Load scheduler configuration from environment.
fn load_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        max_queue_depth: parse_bound("TICKLOOP_MAX_QUEUE_DEPTH"),
        max_priority_drain: parse_bound("TICKLOOP_MAX_PRIORITY_DRAIN"),
        worker_pool: load_worker_pool_config(),
    }
}

/// Load default pipe water marks from environment.
fn load_pipe_config() -> PipeConfig {
    let high = parse_usize("TICKLOOP_HIGH_WATER_MARK", DEFAULT_HIGH_WATER_MARK);
    let low = parse_usize("TICKLOOP_LOW_WATER_MARK", DEFAULT_LOW_WATER_MARK);
    PipeConfig::new(high, low)
}

/// Load logging configuration from environment.
fn load_log_config() -> LogConfig {
    let defaults = LogConfig::default();
    let level = std::env::var("TICKLOOP_LOG")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(defaults.level);
    let format = std::env::var("TICKLOOP_LOG_FORMAT")
        .ok()
        .and_then(|v| LogFormat::parse(&v))
        .unwrap_or(defaults.format);
    let output_path = std::env::var_os("TICKLOOP_LOG_FILE")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    LogConfig { format, level, output_path }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    EnvConfig {
        scheduler: load_scheduler_config(),
        pipe: load_pipe_config(),
        log: load_log_config(),
    }
}

impl EnvConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            worker_threads: self.scheduler.worker_pool.worker_threads.get(),
            worker_queue_size: self.scheduler.worker_pool.queue_size,
            max_queue_depth: self.scheduler.max_queue_depth,
            max_priority_drain: self.scheduler.max_priority_drain,
            high_water_mark: self.pipe.high_water_mark,
            low_water_mark: self.pipe.low_water_mark,
            log_level: self.log.level.clone(),
            log_format: self.log.format.as_str(),
            log_file: self.log.output_path.clone(),
        }
    }
}

// Serialize env-mutating tests to avoid cross-test pollution.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
