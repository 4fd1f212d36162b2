//! Point-in-time bulkhead statistics.

use serde::Serialize;

/// Read-only snapshot returned by [`LlmBulkhead::stats`](super::LlmBulkhead::stats).
///
/// `token_budget` and `deduplication` are present only when the feature is
/// configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkheadStats {
    pub in_flight: usize,
    pub pending: usize,
    pub max_concurrent: usize,
    pub max_queue: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<TokenBudgetStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduplication: Option<DedupStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenBudgetStats {
    pub budget: u64,
    pub in_flight_tokens: u64,
    pub available: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    /// Unsettled deduplicated requests.
    pub active: usize,
    /// Follower joins since the bulkhead was created.
    pub hits: u64,
}
