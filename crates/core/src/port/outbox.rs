//! Outbox store port.
//!
//! An [`OutboxRecord`] is an event awaiting publication, written in the same
//! transaction as the business change that produced it. The Outbox Processor
//! later drains pending records and dispatches them; records are never
//! physically deleted by this engine (retained for audit; cleanup is an
//! external concern).

use super::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event awaiting publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Unique record identifier.
    pub id: Uuid,
    /// Type name the codec uses to resolve the payload.
    pub payload_type: String,
    /// Serialized payload bytes.
    pub payload: Vec<u8>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Set exactly once, on successful dispatch.
    pub processed_at: Option<DateTime<Utc>>,
    /// Last dispatch error, if any.
    pub last_error: Option<String>,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    /// Earliest next attempt; `None` until the first failure, and `None`
    /// again once the record is dead-lettered.
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Create a pending record.
    pub fn new(
        payload_type: impl Into<String>,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload_type: payload_type.into(),
            payload,
            created_at,
            processed_at: None,
            last_error: None,
            retry_count: 0,
            next_retry_at: None,
        }
    }

    /// Whether the record has been dispatched successfully.
    pub fn is_settled(&self) -> bool {
        self.processed_at.is_some()
    }
}

/// Persistence port for outbox records.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a new record. Fails with [`StoreError::DuplicateKey`] if the id
    /// collides.
    async fn add(&self, record: OutboxRecord) -> Result<(), StoreError>;

    /// Fetch a record by id.
    async fn get(&self, id: Uuid) -> Result<Option<OutboxRecord>, StoreError>;

    /// Fetch up to `batch_size` pending records, oldest first.
    ///
    /// Pending means: not processed, `retry_count < max_retries`, and either
    /// never failed or due for retry (`next_retry_at <= now`).
    async fn fetch_pending(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        batch_size: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Record a successful dispatch. Idempotent; a no-op for unknown ids.
    async fn mark_succeeded(
        &self,
        id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record a failed attempt: increments `retry_count` by exactly one,
    /// stores the error and the next retry time (`None` dead-letters the
    /// record). A no-op for unknown ids.
    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_pending() {
        let record = OutboxRecord::new("OrderPlaced", b"{}".to_vec(), Utc::now());
        assert!(!record.is_settled());
        assert_eq!(record.retry_count, 0);
        assert!(record.next_retry_at.is_none());
        assert!(record.last_error.is_none());
    }
}
