//! Config subcommands: show, defaults, validate.
//!
//! These read configuration directly from environment variables.

use crate::config::{self, BulkheadConfig, EffectiveConfig};

/// Print the effective config as JSON to stdout.
pub fn run_show() -> i32 {
    let cfg = config::load().effective_config();
    print_json(&cfg)
}

/// Print the documented defaults for each environment variable.
pub fn run_defaults() {
    let defaults = BulkheadConfig::default();
    println!("LLM_BULKHEAD_PROFILE=interactive");
    println!("LLM_BULKHEAD_MAX_CONCURRENT={}", defaults.max_concurrent);
    println!("LLM_BULKHEAD_MAX_QUEUE={}", defaults.max_queue);
    println!("LLM_BULKHEAD_TIMEOUT_MS={}", defaults.default_timeout_ms.unwrap_or(0));
    println!("LLM_BULKHEAD_TOKEN_BUDGET=0");
    println!("LLM_BULKHEAD_CHARS_PER_TOKEN={}", crate::estimate::DEFAULT_CHARS_PER_TOKEN);
    println!("LLM_BULKHEAD_DEFAULT_MAX_OUTPUT={}", crate::estimate::DEFAULT_MAX_OUTPUT_TOKENS);
    println!("LLM_BULKHEAD_DEDUP=false");
    println!("LLM_BULKHEAD_LOG_LEVEL=info");
    println!("LLM_BULKHEAD_LOG_FORMAT=json");
    println!("LLM_BULKHEAD_LOG_FILE=");
}

/// Validate the environment configuration.
///
/// Returns 0 if valid, 1 otherwise.
pub fn run_validate() -> i32 {
    let env = config::load();
    let mut warnings = 0;

    if let Err(e) = env.bulkhead.validate() {
        eprintln!("ERROR: {e}");
        return 1;
    }

    let cfg = env.effective_config();
    if cfg.max_queue > 0 && cfg.default_timeout_ms.is_none() {
        eprintln!(
            "WARNING: LLM_BULKHEAD_MAX_QUEUE is {} with no LLM_BULKHEAD_TIMEOUT_MS; queued requests may wait indefinitely",
            cfg.max_queue
        );
        warnings += 1;
    }

    if let (Some(budget), Some(max_output)) = (cfg.token_budget, cfg.default_max_output) {
        if u64::from(max_output) > budget {
            eprintln!(
                "WARNING: LLM_BULKHEAD_DEFAULT_MAX_OUTPUT ({max_output}) exceeds LLM_BULKHEAD_TOKEN_BUDGET ({budget}); requests without a hint will always be rejected"
            );
            warnings += 1;
        }
    }

    if warnings == 0 {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn print_json(cfg: &EffectiveConfig) -> i32 {
    match serde_json::to_string_pretty(cfg) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(e) => {
            eprintln!("Failed to encode config: {e}");
            1
        }
    }
}
