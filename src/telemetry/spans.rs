//! Span helpers for bulkhead runs.

use tracing::{info_span, Span};
use uuid::Uuid;

use crate::error::RunError;
use crate::request::Fingerprint;

/// Extension trait for recording a run outcome on its span.
pub trait SpanExt {
    fn record_outcome<T, E>(&self, result: &Result<T, RunError<E>>);
}

impl SpanExt for Span {
    fn record_outcome<T, E>(&self, result: &Result<T, RunError<E>>) {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(RunError::Rejected(reason)) => {
                self.record("status", "rejected");
                self.record("reject_reason", reason.as_str());
            }
            Err(RunError::Work(_)) => {
                self.record("status", "work_error");
            }
            Err(RunError::Interrupted(msg)) => {
                self.record("status", "interrupted");
                self.record("error.message", msg.as_str());
            }
        }
    }
}

/// Factory for `run` spans.
pub struct RunSpan;

impl RunSpan {
    /// Fields `status`, `reject_reason` and `error.message` are filled in by
    /// [`SpanExt::record_outcome`]; `dedup_leader` once the registry answers.
    pub fn new(run_id: &Uuid, fingerprint: Option<&Fingerprint>) -> Span {
        let fingerprint = fingerprint.map(|fp| fp.to_hex());
        info_span!(
            "llm_bulkhead.run",
            run_id = %run_id,
            fingerprint = fingerprint.as_deref().unwrap_or(""),
            dedup_leader = tracing::field::Empty,
            status = tracing::field::Empty,
            reject_reason = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}
