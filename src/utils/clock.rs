use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{Timestamp, now};

/// Time source consulted by quotes and commits
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock backed by chrono
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        now()
    }
}

/// Manually driven clock for deterministic replays and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    current: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: AtomicU64::new(start),
        }
    }

    pub fn set(&self, timestamp: Timestamp) {
        self.current.store(timestamp, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, millis: u64) {
        self.current.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance_ms(secs * 1_000);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.current.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance_secs(60);
        assert_eq!(clock.now(), 61_000);
        clock.set(5);
        assert_eq!(clock.now(), 5);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01 in ms
        assert!(SystemClock.now() > 1_577_836_800_000);
    }
}
