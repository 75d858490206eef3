//! CLI subcommands for `tickloop-cli`.
//!
//! ## Usage
//!
//! ```bash
//! tickloop-cli demo all          # Run every ordering scenario
//! tickloop-cli demo backpressure # Run one scenario
//! tickloop-cli config show       # Effective configuration
//! ```

pub mod config_cmd;
pub mod demo_cmd;

pub use demo_cmd::{run_demo, run_scenario, DemoError, SCENARIOS};
