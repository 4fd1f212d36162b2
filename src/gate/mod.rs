//! Concurrency gate: bounded slots with an optional bounded wait queue.
//!
//! The bulkhead only talks to a gate through [`ConcurrencyGate`]. The
//! default implementation is [`SemaphoreGate`]; callers may plug in their own.

mod semaphore;
mod slot;

pub use semaphore::SemaphoreGate;
pub use slot::SlotToken;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::RejectReason;

/// Per-acquire options passed to a gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateRequest<'a> {
    /// Aborts the wait when fired. Never affects a slot already granted.
    pub cancel: Option<&'a CancellationToken>,
    /// Upper bound on time spent waiting in the queue. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

/// Point-in-time gate occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub in_flight: usize,
    pub pending: usize,
    pub max_concurrent: usize,
    pub max_queue: usize,
}

/// Admission gate for concurrency slots.
///
/// `acquire` may only fail with `ConcurrencyLimit`, `QueueLimit`, `Timeout`
/// or `Aborted`.
#[async_trait]
pub trait ConcurrencyGate: Send + Sync {
    async fn acquire(&self, request: GateRequest<'_>) -> Result<SlotToken, RejectReason>;

    fn stats(&self) -> GateStats;
}
