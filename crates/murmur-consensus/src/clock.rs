//! Lamport clock.

use std::sync::atomic::{AtomicU64, Ordering};

/// A Lamport counter shared by every writer on this node.
///
/// The counter starts at zero on every start and is not persisted; it catches
/// up with the cluster by observing each timestamp the node receives.
#[derive(Debug, Default)]
pub struct LamportClock {
    counter: AtomicU64,
}

impl LamportClock {
    /// Creates a clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock for a local event and returns the new value.
    pub fn tick(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    /// Moves the clock forward to at least `counter`.
    pub fn observe(&self, counter: u64) {
        self.counter.fetch_max(counter, Ordering::SeqCst);
    }

    /// Returns the current value without advancing.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}
