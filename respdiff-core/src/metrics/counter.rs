//! A monotonic counter with a per-interval rate.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::Serialize;

/// Point-in-time view of one counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub total: i64,
    pub speed: i64,
}

/// Atomic counter tracking a running total plus the rate observed over the
/// last rotation interval.
#[derive(Debug, Default)]
pub struct SpeedCounter {
    total: AtomicI64,
    interval_sum: AtomicI64,
    last_speed: AtomicI64,
}

impl SpeedCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, n: i64) {
        self.total.fetch_add(n, Ordering::Relaxed);
        self.interval_sum.fetch_add(n, Ordering::Relaxed);
    }

    /// Snapshot the interval delta into `speed` (per second, rounded up)
    /// and reset the delta bucket.
    pub fn rotate(&self, period_secs: i64) {
        let old = self.interval_sum.swap(0, Ordering::Relaxed);
        let speed = (old + period_secs - 1) / period_secs;
        self.last_speed.store(speed, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.interval_sum.store(0, Ordering::Relaxed);
        self.last_speed.store(0, Ordering::Relaxed);
    }

    pub fn total(&self) -> i64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn speed(&self) -> i64 {
        self.last_speed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total: self.total(),
            speed: self.speed(),
        }
    }
}

impl std::fmt::Display for SpeedCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "total:{},speed:{}", self.total(), self.speed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inc_and_rotate() {
        let c = SpeedCounter::new();
        c.inc(10);
        c.inc(5);
        assert_eq!(c.total(), 15);
        assert_eq!(c.speed(), 0);

        c.rotate(2);
        assert_eq!(c.total(), 15);
        assert_eq!(c.speed(), 8); // ceil(15 / 2)

        c.rotate(2);
        assert_eq!(c.speed(), 0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let c = SpeedCounter::new();
        c.inc(3);
        c.rotate(1);
        c.reset();
        assert_eq!(c.total(), 0);
        assert_eq!(c.speed(), 0);
    }
}
