//! Engine configuration.

use crate::retry::RetryPolicy;
use std::time::Duration;

/// Configuration shared by the engine components.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum records fetched per processor batch.
    pub batch_size: usize,
    /// Retry budget before a record is dead-lettered.
    pub max_retries: u32,
    /// Backoff after the first failed attempt; doubles per attempt.
    pub base_retry_delay: Duration,
    /// How often the processor loops poll for work.
    pub processing_interval: Duration,
    /// When false, `run` returns immediately and nothing is drained.
    pub enable_processor: bool,
    /// How long settled inbox entries are kept before becoming reclaimable.
    pub inbox_ttl: Duration,
    /// Inactivity threshold for the stuck-saga scan.
    pub stuck_saga_threshold: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            base_retry_delay: Duration::from_secs(5),
            processing_interval: Duration::from_secs(1),
            enable_processor: true,
            inbox_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            stuck_saga_threshold: Duration::from_secs(60 * 60),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = delay;
        self
    }

    pub fn with_processing_interval(mut self, interval: Duration) -> Self {
        self.processing_interval = interval;
        self
    }

    pub fn with_processor_enabled(mut self, enabled: bool) -> Self {
        self.enable_processor = enabled;
        self
    }

    pub fn with_inbox_ttl(mut self, ttl: Duration) -> Self {
        self.inbox_ttl = ttl;
        self
    }

    pub fn with_stuck_saga_threshold(mut self, threshold: Duration) -> Self {
        self.stuck_saga_threshold = threshold;
        self
    }

    /// Retry policy derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.base_retry_delay, self.max_retries)
    }

    /// Load configuration from `DUROQ_*` environment variables, falling back
    /// to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_parse("DUROQ_BATCH_SIZE").unwrap_or(defaults.batch_size),
            max_retries: env_parse("DUROQ_MAX_RETRIES").unwrap_or(defaults.max_retries),
            base_retry_delay: env_parse("DUROQ_BASE_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_retry_delay),
            processing_interval: env_parse("DUROQ_PROCESSING_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.processing_interval),
            enable_processor: env_parse("DUROQ_ENABLE_PROCESSOR")
                .unwrap_or(defaults.enable_processor),
            inbox_ttl: env_parse("DUROQ_INBOX_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.inbox_ttl),
            stuck_saga_threshold: env_parse("DUROQ_STUCK_SAGA_THRESHOLD_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stuck_saga_threshold),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
