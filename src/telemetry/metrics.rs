//! Metrics facade calls.
//!
//! These are no-ops until the application installs a `metrics` recorder.

use metrics::{counter, describe_counter, describe_gauge, gauge};

use crate::error::RejectReason;

pub const ADMITTED_TOTAL: &str = "llm_bulkhead_admitted_total";
pub const REJECTED_TOTAL: &str = "llm_bulkhead_rejected_total";
pub const DEDUP_HITS_TOTAL: &str = "llm_bulkhead_dedup_hits_total";
pub const IN_FLIGHT_TOKENS: &str = "llm_bulkhead_in_flight_tokens";

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(ADMITTED_TOTAL, "Requests granted a slot (and budget, if configured)");
    describe_counter!(REJECTED_TOTAL, "Requests rejected at admission, by reason");
    describe_counter!(DEDUP_HITS_TOTAL, "Requests that joined an identical in-flight request");
    describe_gauge!(IN_FLIGHT_TOKENS, "Estimated tokens reserved by admitted requests");
}

pub fn record_admitted() {
    counter!(ADMITTED_TOTAL).increment(1);
}

pub fn record_rejected(reason: RejectReason) {
    counter!(REJECTED_TOTAL, "reason" => reason.as_str()).increment(1);
}

pub fn record_dedup_hit() {
    counter!(DEDUP_HITS_TOTAL).increment(1);
}

pub fn record_in_flight_tokens(tokens: u64) {
    gauge!(IN_FLIGHT_TOKENS).set(tokens as f64);
}
