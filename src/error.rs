//! Error types for the bulkhead.
//!
//! Admission failures are values (`RejectReason`), never panics. Work
//! function failures are carried separately so callers can tell the two apart.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a request was not admitted.
///
/// None of these are retried by the bulkhead; retry policy belongs to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// No free slot and no wait queue configured.
    #[error("concurrency_limit")]
    ConcurrencyLimit,
    /// No free slot and the wait queue was full at enqueue time.
    #[error("queue_limit")]
    QueueLimit,
    /// Estimated cost exceeds the remaining token headroom.
    #[error("budget_limit")]
    BudgetLimit,
    /// Waited in the queue longer than the effective timeout.
    #[error("timeout")]
    Timeout,
    /// Cancellation signal fired before a slot was granted.
    #[error("aborted")]
    Aborted,
}

impl RejectReason {
    pub const ALL: [RejectReason; 5] = [
        Self::ConcurrencyLimit,
        Self::QueueLimit,
        Self::BudgetLimit,
        Self::Timeout,
        Self::Aborted,
    ];

    /// Stable wire name, used for log fields and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConcurrencyLimit => "concurrency_limit",
            Self::QueueLimit => "queue_limit",
            Self::BudgetLimit => "budget_limit",
            Self::Timeout => "timeout",
            Self::Aborted => "aborted",
        }
    }
}

/// Failure of [`LlmBulkhead::run`](crate::LlmBulkhead::run).
///
/// Cloneable so every caller joined on a deduplicated request observes the
/// same outcome.
#[derive(Debug, Error)]
pub enum RunError<E> {
    /// The request was never admitted; the work function did not run.
    #[error("request rejected: {0}")]
    Rejected(RejectReason),

    /// The work function returned an error.
    #[error("work failed: {0}")]
    Work(Arc<E>),

    /// A deduplicated leader panicked or was dropped before settling.
    #[error("work interrupted: {0}")]
    Interrupted(String),
}

impl<E> Clone for RunError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Rejected(reason) => Self::Rejected(*reason),
            Self::Work(err) => Self::Work(Arc::clone(err)),
            Self::Interrupted(msg) => Self::Interrupted(msg.clone()),
        }
    }
}

impl<E> RunError<E> {
    /// Returns true if the failure came from admission control.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }

    /// The work function's own error, if that is what failed.
    pub fn work_error(&self) -> Option<&E> {
        match self {
            Self::Work(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl<E> From<RejectReason> for RunError<E> {
    fn from(reason: RejectReason) -> Self {
        Self::Rejected(reason)
    }
}

/// Invalid construction parameters. Raised synchronously, never at admission time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max_concurrent must be at least 1")]
    ZeroConcurrency,

    #[error("max_concurrent {requested} exceeds the limit of {limit}")]
    ConcurrencyTooLarge { requested: usize, limit: usize },

    #[error("token budget must be at least 1")]
    ZeroBudget,

    #[error("chars_per_token must be at least 1")]
    InvalidTokenRatio,

    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_display_matches_wire_name() {
        for reason in RejectReason::ALL {
            assert_eq!(reason.to_string(), reason.as_str());
        }
    }

    #[test]
    fn reason_serializes_snake_case() {
        let json = serde_json::to_string(&RejectReason::ConcurrencyLimit).unwrap();
        assert_eq!(json, "\"concurrency_limit\"");
    }

    #[test]
    fn run_error_distinguishes_rejection_from_work() {
        let rejected: RunError<std::io::Error> = RejectReason::Timeout.into();
        assert!(rejected.is_rejection());
        assert_eq!(rejected.reject_reason(), Some(RejectReason::Timeout));

        let work: RunError<std::io::Error> =
            RunError::Work(Arc::new(std::io::Error::other("boom")));
        assert!(!work.is_rejection());
        assert_eq!(work.work_error().map(|e| e.to_string()), Some("boom".to_string()));
    }

    #[test]
    fn cloned_work_error_shares_source() {
        let err: RunError<String> = RunError::Work(Arc::new("upstream 500".to_string()));
        let copy = err.clone();
        match (&err, &copy) {
            (RunError::Work(a), RunError::Work(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected work errors"),
        }
    }
}
