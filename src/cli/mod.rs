//! CLI subcommands for inspecting and exercising a bulkhead configuration.
//!
//! ## Usage
//!
//! ```bash
//! llm-bulkhead config show        # Effective configuration as JSON
//! llm-bulkhead config validate    # Exit 0 when the environment config is sound
//! llm-bulkhead simulate --requests 64 --distinct 8
//! ```

pub mod config_cmd;
pub mod simulate;

pub use simulate::{parse_args as parse_simulate_args, run_simulate, SimulateArgs};
