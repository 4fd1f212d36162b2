//! Token cost estimation.
//!
//! The bulkhead only needs an upper-bound guess of what a request will cost
//! before it runs. Estimators must be pure: the same request always maps to
//! the same estimate.

use crate::request::Request;

/// Conservative characters-per-token ratio for English text.
pub const DEFAULT_CHARS_PER_TOKEN: u32 = 4;

/// Framing tokens charged per message (role markers, separators).
pub const DEFAULT_PER_MESSAGE_OVERHEAD: u32 = 4;

/// Output allowance when the request carries no `max_output_tokens` hint.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;

/// Estimated token cost of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenEstimate {
    pub input: u64,
    pub max_output: u64,
}

impl TokenEstimate {
    pub fn new(input: u64, max_output: u64) -> Self {
        Self { input, max_output }
    }

    /// Amount reserved against the budget.
    pub fn cost(&self) -> u64 {
        self.input.saturating_add(self.max_output)
    }
}

/// Maps a request to its estimated token cost.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, request: &Request) -> TokenEstimate;
}

impl<F> TokenEstimator for F
where
    F: Fn(&Request) -> TokenEstimate + Send + Sync,
{
    fn estimate(&self, request: &Request) -> TokenEstimate {
        self(request)
    }
}

/// Character-count heuristic, the default estimator.
#[derive(Debug, Clone)]
pub struct HeuristicEstimator {
    chars_per_token: u32,
    per_message_overhead: u32,
    default_max_output: u32,
}

impl Default for HeuristicEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            per_message_overhead: DEFAULT_PER_MESSAGE_OVERHEAD,
            default_max_output: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

impl HeuristicEstimator {
    /// Ratio is floored at 1 so the estimate never divides by zero.
    pub fn new(chars_per_token: u32, per_message_overhead: u32, default_max_output: u32) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
            per_message_overhead,
            default_max_output,
        }
    }
}

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, request: &Request) -> TokenEstimate {
        let ratio = u64::from(self.chars_per_token);
        let chars = request.char_count() as u64;
        let content = chars.div_ceil(ratio);
        let framing = u64::from(self.per_message_overhead) * request.messages.len() as u64;
        let max_output = request.max_output_tokens.unwrap_or(self.default_max_output);
        TokenEstimate::new(content + framing, u64::from(max_output))
    }
}
