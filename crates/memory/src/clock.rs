//! Manually advanced clock for deterministic tests.

use chrono::{DateTime, Utc};
use duroq_core::port::clock::Clock;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// A clock whose current instant is set explicitly.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// Jump to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.write() = instant;
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += chrono::Duration::milliseconds(by.as_millis().min(i64::MAX as u128) as i64);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}
