//! Per-author Lamport clock
//!
//! A `LogicalClock` is a plain counter with no I/O and no interior
//! mutability. The ledger owns one per author and serializes access to it.

use serde::{Deserialize, Serialize};

/// Lamport counter for a single author
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalClock {
    counter: u64,
}

impl LogicalClock {
    /// Create a clock starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock resuming from a persisted value
    pub fn starting_at(counter: u64) -> Self {
        Self { counter }
    }

    /// Value the next tick would produce, or `None` once the counter has
    /// reached `u64::MAX` and can no longer strictly increase
    pub fn next(&self) -> Option<u64> {
        self.counter.checked_add(1)
    }

    /// Advance for a local event and return the new value.
    ///
    /// Saturates at `u64::MAX`: past that point repeated ticks return the
    /// same value. Callers that need strict increase check `next` first.
    pub fn tick(&mut self) -> u64 {
        self.counter = self.counter.saturating_add(1);
        self.counter
    }

    /// Merge a timestamp observed on a remote entry.
    ///
    /// After this call the clock is strictly past `received`, so the next
    /// local tick can never reproduce an already-seen timestamp. The merge is
    /// `max(counter, received + 1)`: commutative and idempotent, which keeps
    /// reconciliation independent of arrival order and batching.
    pub fn update(&mut self, received: u64) {
        self.counter = self.counter.max(received.saturating_add(1));
    }

    /// Read without mutation
    pub fn current(&self) -> u64 {
        self.counter
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_is_strictly_increasing() {
        let mut clock = LogicalClock::new();
        let mut last = clock.current();
        for _ in 0..100 {
            let next = clock.tick();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_update_then_tick_passes_received() {
        let mut clock = LogicalClock::new();
        clock.update(5);
        assert_eq!(clock.current(), 6);
        assert!(clock.tick() > 5);
    }

    #[test]
    fn test_update_ignores_stale_timestamps() {
        let mut clock = LogicalClock::starting_at(10);
        clock.update(3);
        assert_eq!(clock.current(), 10);
        assert_eq!(clock.tick(), 11);
    }

    #[test]
    fn test_update_order_independent() {
        let mut a = LogicalClock::new();
        a.update(3);
        a.update(5);

        let mut b = LogicalClock::new();
        b.update(5);
        b.update(3);
        b.update(5);

        assert_eq!(a, b);
    }

    #[test]
    fn test_far_future_timestamp_absorbed() {
        let mut clock = LogicalClock::new();
        clock.update(u64::MAX - 1);
        assert_eq!(clock.current(), u64::MAX);
        clock.update(u64::MAX);
        assert_eq!(clock.current(), u64::MAX);
    }

    #[test]
    fn test_next_reports_exhaustion() {
        let mut clock = LogicalClock::starting_at(u64::MAX - 1);
        assert_eq!(clock.next(), Some(u64::MAX));
        assert_eq!(clock.tick(), u64::MAX);
        assert_eq!(clock.next(), None);
        assert_eq!(clock.tick(), u64::MAX);
    }
}
