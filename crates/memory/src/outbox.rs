//! In-memory implementation of the outbox store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duroq_core::port::error::StoreError;
use duroq_core::port::outbox::{OutboxRecord, OutboxStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// In-memory outbox store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryOutboxStore {
    inner: Arc<RwLock<HashMap<Uuid, OutboxRecord>>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored, settled or not.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Drop all records.
    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn add(&self, record: OutboxRecord) -> Result<(), StoreError> {
        let mut records = self.inner.write();
        if records.contains_key(&record.id) {
            return Err(StoreError::duplicate_key(record.id.to_string()));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutboxRecord>, StoreError> {
        Ok(self.inner.read().get(&id).cloned())
    }

    async fn fetch_pending(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        batch_size: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let records = self.inner.read();
        let mut pending: Vec<OutboxRecord> = records
            .values()
            .filter(|r| {
                r.processed_at.is_none()
                    && r.retry_count < max_retries
                    && r.next_retry_at.map_or(true, |due| due <= now)
            })
            .cloned()
            .collect();

        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending.truncate(batch_size);
        Ok(pending)
    }

    async fn mark_succeeded(
        &self,
        id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.inner.write();
        // Unknown id is a no-op: cleanup may have removed the record.
        if let Some(record) = records.get_mut(&id) {
            record.processed_at = Some(processed_at);
            record.last_error = None;
            record.next_retry_at = None;
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut records = self.inner.write();
        if let Some(record) = records.get_mut(&id) {
            record.retry_count += 1;
            record.last_error = Some(error.to_string());
            record.next_retry_at = next_retry_at;
        }
        Ok(())
    }
}
