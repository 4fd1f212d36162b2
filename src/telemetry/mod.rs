//! Telemetry for the bulkhead: logging setup, run spans and metrics.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    describe_metrics, record_admitted, record_dedup_hit, record_in_flight_tokens,
    record_rejected, ADMITTED_TOTAL, DEDUP_HITS_TOTAL, IN_FLIGHT_TOKENS, REJECTED_TOTAL,
};
pub use spans::{RunSpan, SpanExt};
