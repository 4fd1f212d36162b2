//! llm-bulkhead
//!
//! Admission control for expensive, rate-limited LLM calls. Every request is
//! admitted immediately, made to wait briefly, or rejected, against three
//! independent ceilings:
//!
//! - **Concurrency**: at most `max_concurrent` requests run at once, with an
//!   optional bounded FIFO wait queue.
//! - **Token budget**: the summed estimated cost of admitted requests never
//!   exceeds the budget. Budget exhaustion always fails fast.
//! - **Deduplication**: identical concurrent requests share one unit of work.
//!
//! Resources are returned exactly once however the work ends: success, error,
//! panic or cancellation.
//!
//! ```no_run
//! use llm_bulkhead::{AdmitOptions, BulkheadConfig, LlmBulkhead, Message, Request};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let bulkhead: LlmBulkhead<String, std::io::Error> =
//!     LlmBulkhead::new(BulkheadConfig::new(4, 16).with_deduplication(true))?;
//!
//! let request = Request::new(vec![Message::user("Summarize the release notes")]);
//! let answer = bulkhead
//!     .run(&request, |_cancel| async { Ok("...".to_string()) }, AdmitOptions::new())
//!     .await?;
//! # let _ = answer;
//! # Ok(())
//! # }
//! ```

pub mod bulkhead;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod error;
pub mod estimate;
pub mod gate;
pub mod ledger;
pub mod request;
pub mod telemetry;

pub use bulkhead::{AdmitOptions, BulkheadStats, CompositeToken, LlmBulkhead};
pub use config::{BulkheadConfig, Profile, TokenBudgetConfig};
pub use error::{ConfigError, RejectReason, RunError};
pub use estimate::{HeuristicEstimator, TokenEstimate, TokenEstimator};
pub use gate::{ConcurrencyGate, GateRequest, GateStats, SemaphoreGate, SlotToken};
pub use ledger::{Reservation, TokenLedger};
pub use request::{Fingerprint, Message, Request, Role};
pub use tokio_util::sync::CancellationToken;
