//! Token budget ledger.
//!
//! Tracks the token cost of all currently admitted work against a fixed
//! ceiling. Check and commit happen in a single compare-and-swap, so two
//! concurrent reservations can never jointly overshoot the budget.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::RejectReason;

struct LedgerInner {
    budget: u64,
    in_flight: AtomicU64,
}

/// Shared token ledger. Clones observe the same counter.
#[derive(Clone)]
pub struct TokenLedger {
    inner: Arc<LedgerInner>,
}

impl std::fmt::Debug for TokenLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLedger")
            .field("budget", &self.inner.budget)
            .field("in_flight", &self.in_flight_tokens())
            .finish()
    }
}

impl TokenLedger {
    pub fn new(budget: u64) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                budget,
                in_flight: AtomicU64::new(0),
            }),
        }
    }

    /// Reserve `cost` tokens if they fit, otherwise reject without mutating.
    pub fn check_and_reserve(&self, cost: u64) -> Result<Reservation, RejectReason> {
        let budget = self.inner.budget;
        self.inner
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(cost).filter(|next| *next <= budget)
            })
            .map_err(|_| RejectReason::BudgetLimit)?;

        Ok(Reservation {
            amount: cost,
            inner: Some(Arc::clone(&self.inner)),
        })
    }

    /// Whether a reservation of `cost` would fit right now.
    ///
    /// Offers no guarantee: another request may consume the headroom before
    /// the real reservation.
    pub fn peek(&self, cost: u64) -> bool {
        self.in_flight_tokens()
            .checked_add(cost)
            .map_or(false, |next| next <= self.inner.budget)
    }

    /// Return a reservation's tokens to the budget.
    pub fn release(&self, reservation: Reservation) {
        reservation.release();
    }

    pub fn budget(&self) -> u64 {
        self.inner.budget
    }

    pub fn in_flight_tokens(&self) -> u64 {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn available(&self) -> u64 {
        self.inner.budget.saturating_sub(self.in_flight_tokens())
    }
}

impl LedgerInner {
    fn restore(&self, amount: u64) {
        // Floor at zero.
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(amount))
            });
    }
}

/// Tokens held against the budget by one admitted request.
///
/// Restored exactly once, either by [`release`](Self::release) or on drop.
#[must_use = "dropping a reservation immediately returns its tokens"]
pub struct Reservation {
    amount: u64,
    inner: Option<Arc<LedgerInner>>,
}

impl Reservation {
    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn release(mut self) {
        self.restore();
    }

    fn restore(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.restore(self.amount);
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("amount", &self.amount)
            .field("held", &self.inner.is_some())
            .finish()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.restore();
    }
}
