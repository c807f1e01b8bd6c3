//! Monotonic millisecond timestamps.
//!
//! Wall-clock time can repeat or step backwards; the compare-and-set commit in
//! the store needs strictly increasing stamps, so every call returns at least
//! one millisecond more than the previous one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of strictly increasing millisecond timestamps.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Milliseconds since the UNIX epoch, strictly greater than any earlier result.
    pub fn now(&self) -> u64 {
        let wall = wall_millis();
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(wall.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        wall.max(prev + 1)
    }
}

fn wall_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
