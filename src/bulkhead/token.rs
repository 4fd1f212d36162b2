//! Release capability for one admitted request.

use parking_lot::Mutex;

use crate::gate::SlotToken;
use crate::ledger::{Reservation, TokenLedger};
use crate::telemetry;

struct Held {
    slot: SlotToken,
    reservation: Option<(Reservation, TokenLedger)>,
}

/// Slot plus token reservation held by an admitted request.
///
/// `release` moves the token from held to released exactly once; later calls
/// and the final drop are no-ops. Dropping a held token releases it.
pub struct CompositeToken {
    held: Mutex<Option<Held>>,
    reserved: u64,
}

impl CompositeToken {
    pub(crate) fn new(slot: SlotToken, reservation: Option<(Reservation, TokenLedger)>) -> Self {
        let reserved = reservation.as_ref().map_or(0, |(r, _)| r.amount());
        Self {
            held: Mutex::new(Some(Held { slot, reservation })),
            reserved,
        }
    }

    /// Tokens reserved at admission; zero without a budget.
    pub fn reserved_tokens(&self) -> u64 {
        self.reserved
    }

    pub fn is_released(&self) -> bool {
        self.held.lock().is_none()
    }

    pub fn release(&self) {
        let Some(held) = self.held.lock().take() else {
            return;
        };
        // Tokens go back before the slot so a waiter woken by the slot sees
        // the restored headroom.
        if let Some((reservation, ledger)) = held.reservation {
            reservation.release();
            telemetry::record_in_flight_tokens(ledger.in_flight_tokens());
        }
        held.slot.release();
    }
}

impl Drop for CompositeToken {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CompositeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeToken")
            .field("reserved", &self.reserved)
            .field("released", &self.is_released())
            .finish()
    }
}
