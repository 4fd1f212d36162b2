//! Semaphore-backed concurrency gate.
//!
//! Slots are permits of a fair tokio semaphore, so queued waiters are granted
//! in arrival order. The wait queue length is tracked separately so that it
//! can be bounded.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{ConcurrencyGate, GateRequest, GateStats, SlotToken};
use crate::error::{ConfigError, RejectReason};

/// Default gate: `max_concurrent` slots and up to `max_queue` waiters.
pub struct SemaphoreGate {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    max_queue: usize,
    pending: Arc<AtomicUsize>,
}

impl std::fmt::Debug for SemaphoreGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemaphoreGate")
            .field("stats", &self.stats())
            .finish()
    }
}

impl SemaphoreGate {
    pub fn new(max_concurrent: usize, max_queue: usize) -> Result<Self, ConfigError> {
        if max_concurrent == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if max_concurrent > Semaphore::MAX_PERMITS {
            return Err(ConfigError::ConcurrencyTooLarge {
                requested: max_concurrent,
                limit: Semaphore::MAX_PERMITS,
            });
        }
        Ok(Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_queue,
            pending: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Atomically claim a queue position, if one is free.
    fn enter_queue(&self) -> Option<QueuePosition> {
        let max = self.max_queue;
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .ok()?;
        Some(QueuePosition { pending: Arc::clone(&self.pending) })
    }
}

#[async_trait]
impl ConcurrencyGate for SemaphoreGate {
    async fn acquire(&self, request: GateRequest<'_>) -> Result<SlotToken, RejectReason> {
        if request.cancel.map_or(false, |c| c.is_cancelled()) {
            return Err(RejectReason::Aborted);
        }

        // Fails while earlier waiters are queued, which keeps grants FIFO.
        if let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() {
            return Ok(SlotToken::new(permit));
        }

        if self.max_queue == 0 {
            return Err(RejectReason::ConcurrencyLimit);
        }
        let _position = self.enter_queue().ok_or(RejectReason::QueueLimit)?;

        let wait = Arc::clone(&self.slots).acquire_owned();
        let cancelled = async {
            match request.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match request.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            permit = wait => match permit {
                Ok(permit) => Ok(SlotToken::new(permit)),
                // The semaphore is never closed.
                Err(_) => Err(RejectReason::Aborted),
            },
            _ = cancelled => Err(RejectReason::Aborted),
            _ = expired => Err(RejectReason::Timeout),
        }
    }

    fn stats(&self) -> GateStats {
        GateStats {
            in_flight: self.max_concurrent.saturating_sub(self.slots.available_permits()),
            pending: self.pending.load(Ordering::Acquire),
            max_concurrent: self.max_concurrent,
            max_queue: self.max_queue,
        }
    }
}

/// Occupied wait-queue position; vacated on drop whatever the wait outcome.
struct QueuePosition {
    pending: Arc<AtomicUsize>,
}

impl Drop for QueuePosition {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}
