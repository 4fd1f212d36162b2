//! llm-bulkhead command line entry point.
//!
//! ## CLI Subcommands
//!
//! - `llm-bulkhead config [show|defaults|validate]` - Inspect configuration
//! - `llm-bulkhead simulate [OPTIONS]` - Run a synthetic burst (default)
//! - `llm-bulkhead help [COMMAND]` - Show usage

use std::process::ExitCode;

use llm_bulkhead::cli::{config_cmd, parse_simulate_args, run_simulate};
use llm_bulkhead::config;
use llm_bulkhead::telemetry::{describe_metrics, init_logging};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("simulate");

    match command {
        "simulate" => {
            let options = match parse_simulate_args(args.get(2..).unwrap_or_default()) {
                Ok(options) => options,
                Err(e) => {
                    eprintln!("{e}");
                    print_command_help("simulate");
                    return ExitCode::from(2u8);
                }
            };
            if let Err(e) = init_logging(&config::load().log) {
                eprintln!("Logging setup failed: {e}");
                return ExitCode::FAILURE;
            }
            describe_metrics();
            let code = run_simulate(&options).await;
            ExitCode::from(code as u8)
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => ExitCode::from(config_cmd::run_show() as u8),
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
            println!("llm-bulkhead {}", env!("CARGO_PKG_VERSION"));
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
        "llm-bulkhead - admission control for LLM calls v{}

USAGE:
    llm-bulkhead [COMMAND] [OPTIONS]

COMMANDS:
    simulate     Push a synthetic burst through a bulkhead (default)
    config       Inspect configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

ENVIRONMENT:
    LLM_BULKHEAD_PROFILE            interactive | batch
    LLM_BULKHEAD_MAX_CONCURRENT     Concurrent slots
    LLM_BULKHEAD_MAX_QUEUE          Waiters allowed beyond the slots
    LLM_BULKHEAD_TIMEOUT_MS         Default queue wait bound (0 = none)
    LLM_BULKHEAD_TOKEN_BUDGET       In-flight token budget (0 = disabled)
    LLM_BULKHEAD_CHARS_PER_TOKEN    Estimator ratio
    LLM_BULKHEAD_DEFAULT_MAX_OUTPUT Output tokens assumed without a hint
    LLM_BULKHEAD_DEDUP              Collapse identical concurrent requests
    LLM_BULKHEAD_LOG_LEVEL          Log filter (RUST_LOG wins when set)
    LLM_BULKHEAD_LOG_FORMAT         json | pretty
    LLM_BULKHEAD_LOG_FILE           Append logs to a file instead of stderr

EXIT CODES:
    0  Success
    1  Failure / invalid configuration
    2  Usage error
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "simulate" => {
            eprintln!(
                "llm-bulkhead simulate - Run a synthetic burst

USAGE:
    llm-bulkhead simulate [OPTIONS]

OPTIONS:
    --requests N    Requests in the burst (default: 32)
    --distinct N    Distinct prompts; the rest are duplicates (default: 8)
    --work-ms N     Simulated call latency in milliseconds (default: 50)
    --config FILE   Load the bulkhead from a TOML file instead of the environment

DESCRIPTION:
    Fires every request at once and prints a JSON report of completions,
    rejections by reason, and the bulkhead's final stats.

EXAMPLES:
    llm-bulkhead simulate --requests 100 --distinct 10
    llm-bulkhead simulate --config bulkhead.toml
"
            );
        }
        "config" => {
            eprintln!(
                "llm-bulkhead config - Inspect configuration

USAGE:
    llm-bulkhead config [SUBCOMMAND]

SUBCOMMANDS:
    show       Print the effective configuration as JSON (default)
    defaults   Print each environment variable with its default
    validate   Check the configuration; exit 1 on errors or warnings
"
            );
        }
        _ => {
            eprintln!("No detailed help for '{}'", command);
            print_usage();
        }
    }
}
