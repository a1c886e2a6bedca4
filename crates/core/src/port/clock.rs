//! Clock port.
//!
//! All engine components read time through [`Clock`] so tests can substitute
//! a manually advanced clock and exercise TTL, backoff and stuck-saga
//! arithmetic deterministically.

use chrono::{DateTime, Utc};

/// Supplies the current UTC instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
