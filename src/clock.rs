//! Clock abstraction
//!
//! The aggregator and the batcher both reason about wall-clock seconds
//! (bucket decay, black holes, push debounce). Going through this trait
//! keeps those decisions deterministic under test.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current Unix timestamp in seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Real system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests and replays
#[derive(Debug)]
pub struct MockClock {
    timestamp: AtomicI64,
}

impl MockClock {
    pub fn new(timestamp: i64) -> Self {
        MockClock {
            timestamp: AtomicI64::new(timestamp),
        }
    }

    pub fn set(&self, timestamp: i64) {
        self.timestamp.store(timestamp, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.timestamp.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now(&self) -> i64 {
        self.timestamp.load(Ordering::SeqCst)
    }
}
