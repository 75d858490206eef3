//! tickloop CLI entry point.
//!
//! ## CLI Subcommands
//!
//! - `tickloop-cli demo [SCENARIO]` - Run ordering scenarios (default: all)
//! - `tickloop-cli config show|defaults|validate` - Inspect configuration
//! - `tickloop-cli version` - Show version information

use std::process::ExitCode;

use tickloop::cli::{config_cmd, run_demo, SCENARIOS};
use tickloop::config;
use tickloop::telemetry::init_logging;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match command {
        "demo" => {
            let env = config::load();
            if let Err(e) = init_logging(&env.log) {
                eprintln!("Logging disabled: {}", e);
            }
            let scenario = args.get(2).map(|s| s.as_str()).unwrap_or("all");
            ExitCode::from(run_demo(scenario, &env.scheduler) as u8)
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    let json = args.get(3).map(|s| s.as_str()) == Some("--json");
                    ExitCode::from(config_cmd::run_show(json) as u8)
                }
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => ExitCode::from(config_cmd::run_validate() as u8),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("tickloop {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "tickloop - phase-ordered event loop v{}

USAGE:
    tickloop-cli [COMMAND] [OPTIONS]

COMMANDS:
    demo       Run ordering scenarios and print what ran
    config     Inspect configuration (show, defaults, validate)
    version    Show version information
    help       Show this help message

EXAMPLES:
    tickloop-cli demo
    tickloop-cli demo backpressure
    tickloop-cli config show --json
    tickloop-cli help demo

ENVIRONMENT:
    TICKLOOP_LOG         Log filter (default: info)
    TICKLOOP_LOG_FORMAT  json or pretty (default: pretty)
    See `tickloop-cli help config` for the full list.

EXIT CODES:
    0  Success
    1  Failure
    2  Unknown scenario
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "demo" => {
            eprintln!(
                "tickloop-cli demo - Run ordering scenarios

USAGE:
    tickloop-cli demo [SCENARIO]

SCENARIOS:
    all            Run every scenario (default)
    {}

DESCRIPTION:
    priority       A priority task runs before a zero-delay timer.
    completion     A check queued by a completion runs before a new timer.
    backpressure   Writes past the high water mark, then a single drain.
    microtask      Priority tasks, then microtasks, then timers.
",
                SCENARIOS.join("\n    ")
            );
        }
        "config" => {
            eprintln!(
                "tickloop-cli config - Inspect configuration

USAGE:
    tickloop-cli config <SUBCOMMAND>

SUBCOMMANDS:
    show [--json]  Show effective configuration
    defaults       Show default configuration
    validate       Report values that would be ignored or clamped

VARIABLES:
    TICKLOOP_WORKER_THREADS      Worker pool size, 0 = one per CPU (4)
    TICKLOOP_WORKER_QUEUE_SIZE   Per-worker job queue bound (256)
    TICKLOOP_MAX_QUEUE_DEPTH     Per-kind task queue bound, 0 = unbounded (0)
    TICKLOOP_MAX_PRIORITY_DRAIN  Priority drain bound, 0 = unbounded (0)
    TICKLOOP_HIGH_WATER_MARK     Pipe high water mark (16384)
    TICKLOOP_LOW_WATER_MARK      Pipe low water mark (4096)
    TICKLOOP_LOG                 Log filter (info)
    TICKLOOP_LOG_FORMAT          json or pretty (pretty)
    TICKLOOP_LOG_FILE            Log file path (stderr when unset)
"
            );
        }
        _ => {
            eprintln!(
                "No detailed help available for '{}'. Use 'tickloop-cli help' for general usage.",
                command
            );
        }
    }
}
