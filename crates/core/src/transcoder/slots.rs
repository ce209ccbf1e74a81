//! Admission control for concurrent transcodes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counter of live transcodes, shared by everything one relay starts.
///
/// Reservation is a single compare-and-swap, so concurrent start attempts
/// can never exceed the limit.
#[derive(Debug, Clone, Default)]
pub struct TranscodeSlots {
    active: Arc<AtomicUsize>,
}

impl TranscodeSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a slot if fewer than `limit` are held.
    pub fn try_acquire(&self, limit: usize) -> Option<TranscodeSlot> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < limit).then_some(current + 1)
            })
            .ok()
            .map(|_| TranscodeSlot {
                active: Arc::clone(&self.active),
            })
    }

    /// Reserves a slot unconditionally (used when no limit is configured).
    pub fn acquire(&self) -> TranscodeSlot {
        self.active.fetch_add(1, Ordering::AcqRel);
        TranscodeSlot {
            active: Arc::clone(&self.active),
        }
    }

    /// Number of slots currently held.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// A held reservation. Released on drop.
#[derive(Debug)]
pub struct TranscodeSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for TranscodeSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}
