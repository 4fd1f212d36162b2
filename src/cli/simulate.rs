//! `simulate` subcommand: push a synthetic burst through a bulkhead.
//!
//! Useful for sanity-checking a configuration: how many requests a burst of
//! a given shape gets admitted, queued, deduplicated or rejected.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;

use crate::bulkhead::{AdmitOptions, BulkheadStats, LlmBulkhead};
use crate::config::{self, BulkheadConfig};
use crate::error::RunError;
use crate::request::{Message, Request};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulateArgs {
    pub requests: usize,
    /// Number of distinct prompts; requests beyond this repeat earlier ones.
    pub distinct: usize,
    pub work_ms: u64,
    pub config_path: Option<PathBuf>,
}

impl Default for SimulateArgs {
    fn default() -> Self {
        Self { requests: 32, distinct: 8, work_ms: 50, config_path: None }
    }
}

/// Parse `--requests N --distinct N --work-ms N --config PATH`.
pub fn parse_args(args: &[String]) -> Result<SimulateArgs, String> {
    let mut parsed = SimulateArgs::default();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let mut value = || iter.next().ok_or_else(|| format!("{flag} requires a value"));
        match flag.as_str() {
            "--requests" => parsed.requests = parse_number(flag, value()?)?,
            "--distinct" => parsed.distinct = parse_number::<usize>(flag, value()?)?.max(1),
            "--work-ms" => parsed.work_ms = parse_number(flag, value()?)?,
            "--config" => parsed.config_path = Some(PathBuf::from(value()?)),
            other => return Err(format!("unknown option: {other}")),
        }
    }
    Ok(parsed)
}

fn parse_number<N: std::str::FromStr>(flag: &str, value: &str) -> Result<N, String> {
    value
        .parse()
        .map_err(|_| format!("{flag} expects a number, got {value:?}"))
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub requests: usize,
    pub completed: usize,
    pub rejected: BTreeMap<&'static str, usize>,
    pub failed: usize,
    pub stats: BulkheadStats,
}

/// Run the burst against `config` and report outcome counts.
pub async fn simulate(config: BulkheadConfig, args: &SimulateArgs) -> Result<SimulationReport, String> {
    let bulkhead: LlmBulkhead<usize, String> =
        LlmBulkhead::new(config).map_err(|e| e.to_string())?;
    let work = Duration::from_millis(args.work_ms);

    let runs = (0..args.requests).map(|i| {
        let request = Request::new(vec![
            Message::system("You are a concise assistant."),
            Message::user(format!("Synthetic prompt #{}", i % args.distinct.max(1))),
        ]);
        let bulkhead = &bulkhead;
        async move {
            bulkhead
                .run(
                    &request,
                    move |_cancel| async move {
                        tokio::time::sleep(work).await;
                        Ok::<_, String>(i)
                    },
                    AdmitOptions::new(),
                )
                .await
        }
    });

    let mut report = SimulationReport {
        requests: args.requests,
        completed: 0,
        rejected: BTreeMap::new(),
        failed: 0,
        stats: bulkhead.stats(),
    };
    for outcome in join_all(runs).await {
        match outcome {
            Ok(_) => report.completed += 1,
            Err(RunError::Rejected(reason)) => *report.rejected.entry(reason.as_str()).or_default() += 1,
            Err(_) => report.failed += 1,
        }
    }
    report.stats = bulkhead.stats();
    Ok(report)
}

/// CLI entry: load config, simulate, print the JSON report. Returns an exit code.
pub async fn run_simulate(args: &SimulateArgs) -> i32 {
    let config = match &args.config_path {
        Some(path) => match config::from_toml_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Invalid config {}: {e}", path.display());
                return 1;
            }
        },
        None => config::load().bulkhead,
    };

    let report = match simulate(config, args).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Simulation failed: {e}");
            return 1;
        }
    };

    match serde_json::to_string_pretty(&report) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(e) => {
            eprintln!("Failed to encode report: {e}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenBudgetConfig;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_defaults() {
        assert_eq!(parse_args(&[]).unwrap(), SimulateArgs::default());
    }

    #[test]
    fn parse_all_flags() {
        let parsed = parse_args(&args(&[
            "--requests", "10", "--distinct", "0", "--work-ms", "5", "--config", "b.toml",
        ]))
        .unwrap();
        assert_eq!(parsed.requests, 10);
        assert_eq!(parsed.distinct, 1);
        assert_eq!(parsed.work_ms, 5);
        assert_eq!(parsed.config_path, Some(PathBuf::from("b.toml")));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(parse_args(&args(&["--requests"])).is_err());
        assert!(parse_args(&args(&["--requests", "many"])).is_err());
        assert!(parse_args(&args(&["--verbose"])).is_err());
    }

    #[tokio::test]
    async fn burst_without_queue_rejects_overflow() {
        let sim = SimulateArgs { requests: 6, distinct: 6, work_ms: 20, config_path: None };
        let report = simulate(BulkheadConfig::new(2, 0), &sim).await.unwrap();
        assert_eq!(report.completed, 2);
        assert_eq!(report.rejected.get("concurrency_limit"), Some(&4));
        assert_eq!(report.stats.in_flight, 0);
    }

    #[tokio::test]
    async fn duplicate_prompts_are_collapsed() {
        let sim = SimulateArgs { requests: 8, distinct: 2, work_ms: 20, config_path: None };
        let config = BulkheadConfig::new(2, 0)
            .with_deduplication(true)
            .with_token_budget(TokenBudgetConfig::with_budget(100_000));
        let report = simulate(config, &sim).await.unwrap();
        assert_eq!(report.completed, 8);
        let dedup = report.stats.deduplication.unwrap();
        assert_eq!(dedup.hits, 6);
        assert_eq!(dedup.active, 0);
        assert_eq!(report.stats.token_budget.unwrap().in_flight_tokens, 0);
    }
}
