//! Inbox guard.
//!
//! Synchronous interception layer placed in front of the dispatcher for
//! inbound requests carrying an idempotency key. The first caller for a key
//! claims it with a unique-constraint insert and proceeds; a duplicate of a
//! settled request is replayed from the cached response without a second
//! dispatch; a duplicate of an in-flight request is rejected rather than
//! re-run, so a non-idempotent side effect never executes twice concurrently.

use crate::codec::Payload;
use crate::config::EngineConfig;
use crate::port::clock::Clock;
use crate::port::dispatcher::RequestDispatcher;
use crate::port::error::StoreError;
use crate::port::inbox::{InboxRecord, InboxStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for the inbox guard.
#[derive(Debug, Clone)]
pub struct InboxConfig {
    /// How long settled entries are kept before becoming reclaimable.
    pub ttl: Duration,
    /// When set, failed attempts store `now + retry_delay` as the retry
    /// schedule for callers expected to retry the same key.
    pub retry_delay: Option<Duration>,
}

impl InboxConfig {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            retry_delay: None,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }
}

impl From<&EngineConfig> for InboxConfig {
    fn from(config: &EngineConfig) -> Self {
        Self::new(config.inbox_ttl)
    }
}

/// Errors surfaced to the caller of [`InboxGuard::intercept`].
#[derive(Debug, thiserror::Error)]
pub enum InboxError {
    /// The key is claimed by a concurrent (or crashed mid-flight) execution.
    /// Caller-correctable; not retried automatically by this engine.
    #[error("request '{0}' is already in flight")]
    InFlight(String),

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// De-duplicating interception layer for inbound requests.
pub struct InboxGuard {
    store: Arc<dyn InboxStore>,
    dispatcher: Arc<dyn RequestDispatcher>,
    clock: Arc<dyn Clock>,
    config: InboxConfig,
}

impl InboxGuard {
    pub fn new(
        store: Arc<dyn InboxStore>,
        dispatcher: Arc<dyn RequestDispatcher>,
        clock: Arc<dyn Clock>,
        config: InboxConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            config,
        }
    }

    /// Process a request exactly once per `message_id`.
    ///
    /// Returns the dispatcher's response bytes, cached ones when the key was
    /// already settled. The insert-claim races atomically against concurrent
    /// callers; the loser observes `DuplicateKey` and resolves to either a
    /// replay or [`InboxError::InFlight`].
    pub async fn intercept(
        &self,
        message_id: &str,
        request_type: &str,
        payload: Payload,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, InboxError> {
        let now = self.clock.now();
        let record = InboxRecord::new(message_id, request_type, now, after(now, self.config.ttl));

        match self.store.add(record).await {
            Ok(()) => {}
            Err(StoreError::DuplicateKey(_)) => {
                return match self.store.get(message_id).await? {
                    Some(existing) if existing.is_settled() => {
                        debug!(message_id, "duplicate suppressed, replaying cached response");
                        Ok(existing.cached_response)
                    }
                    _ => Err(InboxError::InFlight(message_id.to_string())),
                };
            }
            Err(e) => return Err(e.into()),
        }

        match self.dispatcher.dispatch(payload, cancel).await {
            Ok(response) => {
                self.store
                    .mark_succeeded(message_id, response.clone(), self.clock.now())
                    .await?;
                Ok(response)
            }
            Err(failure) => {
                let reason = failure.to_string();
                warn!(message_id, "inbound dispatch failed: {reason}");
                let next_retry_at = self
                    .config
                    .retry_delay
                    .map(|delay| after(self.clock.now(), delay));
                self.store
                    .mark_failed(message_id, &reason, next_retry_at)
                    .await?;
                Err(InboxError::Dispatch(reason))
            }
        }
    }

    /// Remove settled records past their TTL. Returns the number removed.
    ///
    /// Unsettled-but-expired records are left in place: that is a dead-letter
    /// condition for operator inspection, never a silent removal.
    pub async fn reclaim_expired(&self, batch_size: usize) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let expired = self.store.fetch_expired(now, batch_size).await?;
        let mut removed = 0;
        for record in expired {
            self.store.remove(&record.message_id).await?;
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, "reclaimed expired inbox records");
        }
        Ok(removed)
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now + chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64)
}
