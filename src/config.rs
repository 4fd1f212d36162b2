//! Bulkhead configuration.
//!
//! Configuration comes from code, a TOML file, or `LLM_BULKHEAD_*`
//! environment variables. Environment values that are missing or invalid
//! fall back to the defaults without failing; structural problems (zero
//! concurrency, zero budget) are reported by [`BulkheadConfig::validate`].
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `LLM_BULKHEAD_PROFILE` | interactive | Preset: `interactive` or `batch` |
//! | `LLM_BULKHEAD_MAX_CONCURRENT` | profile | Max concurrently admitted requests |
//! | `LLM_BULKHEAD_MAX_QUEUE` | profile | Max requests waiting for a slot |
//! | `LLM_BULKHEAD_TIMEOUT_MS` | profile | Default queue wait timeout (0 = none) |
//! | `LLM_BULKHEAD_TOKEN_BUDGET` | 0 | Max tokens in flight (0 = no budget) |
//! | `LLM_BULKHEAD_CHARS_PER_TOKEN` | 4 | Estimator character ratio |
//! | `LLM_BULKHEAD_DEFAULT_MAX_OUTPUT` | 1024 | Output allowance without a hint |
//! | `LLM_BULKHEAD_DEDUP` | false | Collapse identical concurrent requests |
//! | `LLM_BULKHEAD_LOG_LEVEL` | info | Log filter directive (`RUST_LOG` takes precedence) |
//! | `LLM_BULKHEAD_LOG_FORMAT` | json | `json` or `pretty` |
//! | `LLM_BULKHEAD_LOG_FILE` | unset | Append logs to this file instead of stderr |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::ConfigError;
use crate::estimate::{
    HeuristicEstimator, DEFAULT_CHARS_PER_TOKEN, DEFAULT_MAX_OUTPUT_TOKENS,
    DEFAULT_PER_MESSAGE_OVERHEAD,
};
use crate::telemetry::{LogConfig, LogFormat};

/// Largest accepted `max_concurrent`; the semaphore cannot hold more permits.
pub const MAX_CONCURRENT_LIMIT: usize = Semaphore::MAX_PERMITS;

/// Named presets for the gate and its default wait timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// User-facing traffic: short queue, bounded wait.
    #[default]
    Interactive,
    /// Background jobs: deep queue, wait as long as it takes.
    Batch,
}

impl std::str::FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interactive" => Ok(Self::Interactive),
            "batch" => Ok(Self::Batch),
            other => Err(format!("unknown profile: {other}")),
        }
    }
}

/// Token budget settings. Present only when a budget is enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenBudgetConfig {
    /// Ceiling on the summed estimated cost of all admitted requests.
    pub max_in_flight_tokens: u64,
    pub chars_per_token: u32,
    pub per_message_overhead: u32,
    pub default_max_output: u32,
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self {
            max_in_flight_tokens: 100_000,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            per_message_overhead: DEFAULT_PER_MESSAGE_OVERHEAD,
            default_max_output: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

impl TokenBudgetConfig {
    pub fn with_budget(max_in_flight_tokens: u64) -> Self {
        Self { max_in_flight_tokens, ..Default::default() }
    }

    /// Default estimator built from these ratios.
    pub fn estimator(&self) -> HeuristicEstimator {
        HeuristicEstimator::new(
            self.chars_per_token,
            self.per_message_overhead,
            self.default_max_output,
        )
    }
}

/// Configuration for one bulkhead instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadConfig {
    pub max_concurrent: usize,
    /// Waiters allowed when all slots are busy. Zero means fail fast.
    pub max_queue: usize,
    /// Queue wait bound used when a call does not pass its own timeout.
    pub default_timeout_ms: Option<u64>,
    pub token_budget: Option<TokenBudgetConfig>,
    pub deduplicate: bool,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self::for_profile(Profile::Interactive)
    }
}

impl BulkheadConfig {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Interactive => Self {
                max_concurrent: 4,
                max_queue: 16,
                default_timeout_ms: Some(30_000),
                token_budget: None,
                deduplicate: false,
            },
            Profile::Batch => Self {
                max_concurrent: 2,
                max_queue: 256,
                default_timeout_ms: None,
                token_budget: None,
                deduplicate: false,
            },
        }
    }

    /// Gate-only config with no default timeout.
    pub fn new(max_concurrent: usize, max_queue: usize) -> Self {
        Self {
            max_concurrent,
            max_queue,
            default_timeout_ms: None,
            token_budget: None,
            deduplicate: false,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_token_budget(mut self, budget: TokenBudgetConfig) -> Self {
        self.token_budget = Some(budget);
        self
    }

    pub fn with_deduplication(mut self, enabled: bool) -> Self {
        self.deduplicate = enabled;
        self
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.max_concurrent > MAX_CONCURRENT_LIMIT {
            return Err(ConfigError::ConcurrencyTooLarge {
                requested: self.max_concurrent,
                limit: MAX_CONCURRENT_LIMIT,
            });
        }
        if let Some(budget) = &self.token_budget {
            if budget.max_in_flight_tokens == 0 {
                return Err(ConfigError::ZeroBudget);
            }
            if budget.chars_per_token == 0 {
                return Err(ConfigError::InvalidTokenRatio);
            }
        }
        Ok(())
    }
}

/// Parse a bulkhead config from TOML and validate it.
pub fn from_toml_str(text: &str) -> Result<BulkheadConfig, ConfigError> {
    let config: BulkheadConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
}

pub fn from_toml_file(path: impl AsRef<Path>) -> Result<BulkheadConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    from_toml_str(&text)
}

/// Effective configuration summary, as printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub max_concurrent: usize,
    pub max_queue: usize,
    pub default_timeout_ms: Option<u64>,
    pub token_budget: Option<u64>,
    pub chars_per_token: Option<u32>,
    pub default_max_output: Option<u32>,
    pub deduplicate: bool,
    pub log_level: String,
    pub log_format: LogFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

/// All configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub bulkhead: BulkheadConfig,
    pub log: LogConfig,
}

/// Serializes tests that mutate `LLM_BULKHEAD_*` variables.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn load_bulkhead_config() -> BulkheadConfig {
    let profile = std::env::var("LLM_BULKHEAD_PROFILE")
        .ok()
        .and_then(|p| p.parse::<Profile>().ok())
        .unwrap_or_default();
    let preset = BulkheadConfig::for_profile(profile);

    let max_concurrent = parse_usize("LLM_BULKHEAD_MAX_CONCURRENT", preset.max_concurrent)
        .clamp(1, MAX_CONCURRENT_LIMIT);
    let max_queue = parse_usize("LLM_BULKHEAD_MAX_QUEUE", preset.max_queue);
    let timeout_ms = parse_u64(
        "LLM_BULKHEAD_TIMEOUT_MS",
        preset.default_timeout_ms.unwrap_or(0),
    );

    let budget = parse_u64("LLM_BULKHEAD_TOKEN_BUDGET", 0);
    let token_budget = (budget > 0).then(|| TokenBudgetConfig {
        max_in_flight_tokens: budget,
        chars_per_token: parse_u32("LLM_BULKHEAD_CHARS_PER_TOKEN", DEFAULT_CHARS_PER_TOKEN).max(1),
        per_message_overhead: DEFAULT_PER_MESSAGE_OVERHEAD,
        default_max_output: parse_u32("LLM_BULKHEAD_DEFAULT_MAX_OUTPUT", DEFAULT_MAX_OUTPUT_TOKENS),
    });

    BulkheadConfig {
        max_concurrent,
        max_queue,
        default_timeout_ms: (timeout_ms > 0).then_some(timeout_ms),
        token_budget,
        deduplicate: parse_bool("LLM_BULKHEAD_DEDUP", false),
    }
}

fn load_log_config() -> LogConfig {
    let level = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("LLM_BULKHEAD_LOG_LEVEL"))
        .unwrap_or_else(|_| "info".to_string());
    let format = match std::env::var("LLM_BULKHEAD_LOG_FORMAT").as_deref() {
        Ok("pretty") => LogFormat::Pretty,
        _ => LogFormat::Json,
    };
    let output_path = std::env::var_os("LLM_BULKHEAD_LOG_FILE")
        .filter(|path| !path.is_empty())
        .map(PathBuf::from);
    LogConfig { format, level, output_path }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    EnvConfig {
        bulkhead: load_bulkhead_config(),
        log: load_log_config(),
    }
}

impl EnvConfig {
    pub fn effective_config(&self) -> EffectiveConfig {
        let budget = self.bulkhead.token_budget.as_ref();
        EffectiveConfig {
            max_concurrent: self.bulkhead.max_concurrent,
            max_queue: self.bulkhead.max_queue,
            default_timeout_ms: self.bulkhead.default_timeout_ms,
            token_budget: budget.map(|b| b.max_in_flight_tokens),
            chars_per_token: budget.map(|b| b.chars_per_token),
            default_max_output: budget.map(|b| b.default_max_output),
            deduplicate: self.bulkhead.deduplicate,
            log_level: self.log.level.clone(),
            log_format: self.log.format,
            log_file: self.log.output_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENV_KEYS: &[&str] = &[
        "LLM_BULKHEAD_PROFILE",
        "LLM_BULKHEAD_MAX_CONCURRENT",
        "LLM_BULKHEAD_MAX_QUEUE",
        "LLM_BULKHEAD_TIMEOUT_MS",
        "LLM_BULKHEAD_TOKEN_BUDGET",
        "LLM_BULKHEAD_CHARS_PER_TOKEN",
        "LLM_BULKHEAD_DEFAULT_MAX_OUTPUT",
        "LLM_BULKHEAD_DEDUP",
        "LLM_BULKHEAD_LOG_LEVEL",
        "LLM_BULKHEAD_LOG_FORMAT",
        "LLM_BULKHEAD_LOG_FILE",
        "RUST_LOG",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        let cfg = load();
        assert_eq!(cfg.bulkhead, BulkheadConfig::for_profile(Profile::Interactive));
        assert!(cfg.bulkhead.validate().is_ok());
        assert_eq!(cfg.log.level, "info");
        assert_eq!(cfg.log.format, LogFormat::Json);
    }

    #[test]
    fn test_batch_profile_from_env() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        std::env::set_var("LLM_BULKHEAD_PROFILE", "Batch");
        let cfg = load();
        assert_eq!(cfg.bulkhead.max_queue, 256);
        assert_eq!(cfg.bulkhead.default_timeout(), None);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        std::env::set_var("LLM_BULKHEAD_MAX_CONCURRENT", "lots");
        std::env::set_var("LLM_BULKHEAD_DEDUP", "maybe");
        let cfg = load();
        assert_eq!(cfg.bulkhead.max_concurrent, 4);
        assert!(!cfg.bulkhead.deduplicate);

        std::env::set_var("LLM_BULKHEAD_MAX_CONCURRENT", "0");
        let cfg = load();
        assert_eq!(cfg.bulkhead.max_concurrent, 1, "must be floored");

        std::env::set_var("LLM_BULKHEAD_MAX_CONCURRENT", usize::MAX.to_string());
        let cfg = load();
        assert_eq!(cfg.bulkhead.max_concurrent, MAX_CONCURRENT_LIMIT, "must be capped");
        assert!(cfg.bulkhead.validate().is_ok());
        clear_env_vars();
    }

    #[test]
    fn test_log_file_from_env() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        assert_eq!(load().log.output_path, None);

        std::env::set_var("LLM_BULKHEAD_LOG_FILE", "/var/log/bulkhead.jsonl");
        let cfg = load();
        assert_eq!(cfg.log.output_path, Some(PathBuf::from("/var/log/bulkhead.jsonl")));
        assert_eq!(
            cfg.effective_config().log_file,
            Some(PathBuf::from("/var/log/bulkhead.jsonl"))
        );

        std::env::set_var("LLM_BULKHEAD_LOG_FILE", "");
        assert_eq!(load().log.output_path, None);
        clear_env_vars();
    }

    #[test]
    fn test_validate_rejects_oversized_concurrency() {
        let cfg = BulkheadConfig::new(MAX_CONCURRENT_LIMIT + 1, 0);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ConcurrencyTooLarge { limit: MAX_CONCURRENT_LIMIT, .. })
        ));
        let err = from_toml_str("max_concurrent = 9223372036854775807").unwrap_err();
        assert!(matches!(err, ConfigError::ConcurrencyTooLarge { .. }));
    }

    #[test]
    fn test_huge_default_timeout_saturates() {
        let cfg = BulkheadConfig::new(1, 1).with_default_timeout(Duration::MAX);
        assert_eq!(cfg.default_timeout_ms, Some(u64::MAX));
    }

    #[test]
    fn test_token_budget_from_env() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        std::env::set_var("LLM_BULKHEAD_TOKEN_BUDGET", "5000");
        std::env::set_var("LLM_BULKHEAD_DEFAULT_MAX_OUTPUT", "256");
        std::env::set_var("LLM_BULKHEAD_DEDUP", "1");
        std::env::set_var("LLM_BULKHEAD_TIMEOUT_MS", "0");
        let cfg = load();
        let budget = cfg.bulkhead.token_budget.clone().unwrap();
        assert_eq!(budget.max_in_flight_tokens, 5000);
        assert_eq!(budget.default_max_output, 256);
        assert!(cfg.bulkhead.deduplicate);
        assert_eq!(cfg.bulkhead.default_timeout(), None);

        let eff = cfg.effective_config();
        assert_eq!(eff.token_budget, Some(5000));
        clear_env_vars();
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let cfg = BulkheadConfig::new(0, 0);
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroConcurrency)));
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let cfg = BulkheadConfig::new(1, 0).with_token_budget(TokenBudgetConfig::with_budget(0));
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroBudget)));
    }

    #[test]
    fn test_from_toml_str() {
        let cfg = from_toml_str(
            r#"
            max_concurrent = 8
            max_queue = 32
            default_timeout_ms = 500
            deduplicate = true

            [token_budget]
            max_in_flight_tokens = 20000
            "#,
        )
        .unwrap();
        assert_eq!(cfg.max_concurrent, 8);
        assert_eq!(cfg.default_timeout(), Some(Duration::from_millis(500)));
        assert!(cfg.deduplicate);
        let budget = cfg.token_budget.unwrap();
        assert_eq!(budget.max_in_flight_tokens, 20_000);
        assert_eq!(budget.chars_per_token, DEFAULT_CHARS_PER_TOKEN);
    }

    #[test]
    fn test_from_toml_str_validates() {
        let err = from_toml_str("max_concurrent = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ZeroConcurrency));
    }

    #[test]
    fn test_from_toml_str_reports_parse_errors() {
        let err = from_toml_str("max_concurrent = \"four\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
