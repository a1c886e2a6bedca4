//! Inbox store port.
//!
//! An [`InboxRecord`] is a de-duplication ledger entry for one inbound
//! request, keyed by a caller-supplied idempotency key. Exactly one settled
//! outcome exists per key. Settled records past their TTL are reclaimable;
//! unsettled-but-expired records are a dead-letter condition and are never
//! removed silently.

use super::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// De-duplication ledger entry for one inbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxRecord {
    /// Caller-supplied idempotency key; the primary key.
    pub message_id: String,
    /// Request type name, for diagnostics and cleanup tooling.
    pub request_type: String,
    /// First sighting of this key.
    pub received_at: DateTime<Utc>,
    /// Set on successful dispatch only; failed attempts leave it unset so
    /// the record never matches the expired-cleanup selection.
    pub processed_at: Option<DateTime<Utc>>,
    /// TTL boundary; settled records past this are reclaimable.
    pub expires_at: DateTime<Utc>,
    /// Serialized response replayed to duplicate callers.
    pub cached_response: Option<Vec<u8>>,
    /// Last dispatch error, if any.
    pub last_error: Option<String>,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    /// Earliest next attempt for callers expected to retry the same key.
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl InboxRecord {
    /// Create an unsettled record for a first-seen key.
    pub fn new(
        message_id: impl Into<String>,
        request_type: impl Into<String>,
        received_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            request_type: request_type.into(),
            received_at,
            processed_at: None,
            expires_at,
            cached_response: None,
            last_error: None,
            retry_count: 0,
            next_retry_at: None,
        }
    }

    /// Settled means processed without a lingering error: the cached outcome
    /// is authoritative and duplicates are replayed from it.
    pub fn is_settled(&self) -> bool {
        self.processed_at.is_some() && self.last_error.is_none()
    }
}

/// Persistence port for inbox records.
#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Insert a new record. Fails with [`StoreError::DuplicateKey`] if the
    /// key exists; this is the atomic claim the guard relies on, so the
    /// insert must be unique-constraint-backed, not check-then-insert.
    async fn add(&self, record: InboxRecord) -> Result<(), StoreError>;

    /// Fetch a record by idempotency key.
    async fn get(&self, message_id: &str) -> Result<Option<InboxRecord>, StoreError>;

    /// Fetch up to `batch_size` settled records past their TTL, oldest
    /// expiry first.
    async fn fetch_expired(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Vec<InboxRecord>, StoreError>;

    /// Settle a record with its serialized response. Idempotent; a no-op for
    /// unknown keys.
    async fn mark_succeeded(
        &self,
        message_id: &str,
        response: Option<Vec<u8>>,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record a failed attempt: increments `retry_count`, stores the error
    /// and an optional retry schedule. A no-op for unknown keys.
    async fn mark_failed(
        &self,
        message_id: &str,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Physically delete a record. Used by the expired-cleanup path only.
    async fn remove(&self, message_id: &str) -> Result<(), StoreError>;
}
