//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands read configuration directly from environment variables.

use tracing_subscriber::EnvFilter;

use crate::config::{self, EffectiveConfig, EnvConfig};
use crate::telemetry::LogFormat;

/// Print effective config as key-value pairs (or JSON) to stdout.
pub fn run_show(json: bool) -> i32 {
    let cfg = config::load().effective_config();
    if json {
        match serde_json::to_string_pretty(&cfg) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Failed to serialize configuration: {e}");
                return 1;
            }
        }
    } else {
        for line in render(&cfg) {
            println!("{line}");
        }
    }
    0
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults() {
    for line in render(&EnvConfig::default().effective_config()) {
        println!("{line}");
    }
}

/// Validate configuration for obvious misconfigurations.
///
/// Returns 0 if valid, 1 if any warnings are found.
pub fn run_validate() -> i32 {
    let warnings = validate();
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        for warning in &warnings {
            eprintln!("WARNING: {warning}");
        }
        1
    }
}

/// Collect warnings about the current environment.
///
/// Loading never fails, so this looks at raw values the loader would
/// silently replace.
pub fn validate() -> Vec<String> {
    let mut warnings = Vec::new();

    for key in [
        "TICKLOOP_WORKER_THREADS",
        "TICKLOOP_WORKER_QUEUE_SIZE",
        "TICKLOOP_MAX_QUEUE_DEPTH",
        "TICKLOOP_MAX_PRIORITY_DRAIN",
        "TICKLOOP_HIGH_WATER_MARK",
        "TICKLOOP_LOW_WATER_MARK",
    ] {
        if let Ok(raw) = std::env::var(key) {
            if raw.trim().parse::<usize>().is_err() {
                warnings.push(format!("{key}={raw:?} is not a non-negative integer; default used"));
            }
        }
    }

    if let Ok(raw) = std::env::var("TICKLOOP_LOG_FORMAT") {
        if LogFormat::parse(&raw).is_none() {
            warnings.push(format!("TICKLOOP_LOG_FORMAT={raw:?} is neither json nor pretty"));
        }
    }

    let cfg = config::load();
    if let Err(e) = EnvFilter::try_new(&cfg.log.level) {
        warnings.push(format!("TICKLOOP_LOG={:?} is not a valid filter: {e}", cfg.log.level));
    }

    let requested_low = std::env::var("TICKLOOP_LOW_WATER_MARK")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok());
    if let Some(low) = requested_low {
        if low > cfg.pipe.high_water_mark {
            warnings.push(format!(
                "TICKLOOP_LOW_WATER_MARK ({low}) > TICKLOOP_HIGH_WATER_MARK ({}); clamped",
                cfg.pipe.high_water_mark
            ));
        }
    }
    if cfg.pipe.high_water_mark == 0 {
        warnings.push("TICKLOOP_HIGH_WATER_MARK is 0; every write reports backpressure".to_string());
    }

    warnings
}

fn render(cfg: &EffectiveConfig) -> Vec<String> {
    let bound = |b: Option<usize>| b.unwrap_or(0);
    vec![
        format!("TICKLOOP_WORKER_THREADS={}", cfg.worker_threads),
        format!("TICKLOOP_WORKER_QUEUE_SIZE={}", cfg.worker_queue_size),
        format!("TICKLOOP_MAX_QUEUE_DEPTH={}", bound(cfg.max_queue_depth)),
        format!("TICKLOOP_MAX_PRIORITY_DRAIN={}", bound(cfg.max_priority_drain)),
        format!("TICKLOOP_HIGH_WATER_MARK={}", cfg.high_water_mark),
        format!("TICKLOOP_LOW_WATER_MARK={}", cfg.low_water_mark),
        format!("TICKLOOP_LOG={}", cfg.log_level),
        format!("TICKLOOP_LOG_FORMAT={}", cfg.log_format),
        format!(
            "TICKLOOP_LOG_FILE={}",
            cfg.log_file.as_ref().map(|p| p.display().to_string()).unwrap_or_default()
        ),
    ]
}
