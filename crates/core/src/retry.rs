//! Retry and dead-letter arithmetic.
//!
//! Pure functions, no I/O; shared by the Outbox and Scheduler processors.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Exponential backoff policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Wait after the first failure; doubles per subsequent attempt.
    pub base_delay: Duration,
    /// Retry budget before a record is dead-lettered.
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
        }
    }

    /// Next retry time for a failure at `now`.
    ///
    /// `attempt` is the retry count after incrementing for the current
    /// failure: attempt 1 waits one base delay, attempt 2 waits twice that,
    /// attempt 3 four times.
    pub fn next_retry_at(&self, now: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
        let base_ms = self.base_delay.as_millis();
        let multiplier = 2_u128.saturating_pow(attempt.saturating_sub(1));
        let delay_ms = base_ms.saturating_mul(multiplier);
        now + chrono::Duration::milliseconds(delay_ms.min(i64::MAX as u128) as i64)
    }

    /// Whether a record with this retry count is out of budget.
    pub fn is_dead_lettered(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Retry schedule for the attempt that just failed, or `None` when the
    /// record is now dead-lettered.
    pub fn schedule_for(&self, now: DateTime<Utc>, attempt: u32) -> Option<DateTime<Utc>> {
        if self.is_dead_lettered(attempt) {
            None
        } else {
            Some(self.next_retry_at(now, attempt))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(Duration::from_secs(5), 10);
        let now = Utc::now();

        assert_eq!(policy.next_retry_at(now, 1) - now, chrono::Duration::seconds(5));
        assert_eq!(policy.next_retry_at(now, 2) - now, chrono::Duration::seconds(10));
        assert_eq!(policy.next_retry_at(now, 3) - now, chrono::Duration::seconds(20));
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let policy = RetryPolicy::new(Duration::from_secs(5), 10);
        let now = Utc::now();
        let next = policy.next_retry_at(now, 200);
        assert!(next > now);
    }

    #[test]
    fn test_dead_letter_threshold() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 3);
        assert!(!policy.is_dead_lettered(2));
        assert!(policy.is_dead_lettered(3));
        assert!(policy.is_dead_lettered(4));
    }

    #[test]
    fn test_schedule_for_exhausted_budget_is_none() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 3);
        let now = Utc::now();
        assert!(policy.schedule_for(now, 2).is_some());
        assert!(policy.schedule_for(now, 3).is_none());
    }

    #[test]
    fn test_zero_budget_dead_letters_immediately() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 0);
        assert!(policy.is_dead_lettered(0));
        assert!(policy.schedule_for(Utc::now(), 1).is_none());
    }
}
