//! Slot capability handed out by a concurrency gate.

use std::any::Any;

use parking_lot::Mutex;

/// One occupied concurrency slot.
///
/// Wraps whatever guard the gate uses to track occupancy; the slot is given
/// back when that guard is dropped. `release` may be called any number of
/// times, only the first has an effect. An unreleased token releases on drop.
pub struct SlotToken {
    held: Mutex<Option<Box<dyn Any + Send>>>,
}

impl SlotToken {
    pub fn new<G: Any + Send>(guard: G) -> Self {
        Self { held: Mutex::new(Some(Box::new(guard))) }
    }

    /// Give the slot back to its gate.
    pub fn release(&self) {
        let guard = self.held.lock().take();
        drop(guard);
    }

    pub fn is_released(&self) -> bool {
        self.held.lock().is_none()
    }
}

impl std::fmt::Debug for SlotToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotToken")
            .field("released", &self.is_released())
            .finish()
    }
}
