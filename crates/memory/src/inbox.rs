//! In-memory implementation of the inbox store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duroq_core::port::error::StoreError;
use duroq_core::port::inbox::{InboxRecord, InboxStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory inbox store.
///
/// The insert path holds the write lock across the existence check and the
/// insert, which gives the same atomic-claim guarantee a unique constraint
/// provides in a relational backend.
#[derive(Debug, Default, Clone)]
pub struct InMemoryInboxStore {
    inner: Arc<RwLock<HashMap<String, InboxRecord>>>,
}

impl InMemoryInboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

#[async_trait]
impl InboxStore for InMemoryInboxStore {
    async fn add(&self, record: InboxRecord) -> Result<(), StoreError> {
        let mut records = self.inner.write();
        if records.contains_key(&record.message_id) {
            return Err(StoreError::duplicate_key(record.message_id.clone()));
        }
        records.insert(record.message_id.clone(), record);
        Ok(())
    }

    async fn get(&self, message_id: &str) -> Result<Option<InboxRecord>, StoreError> {
        Ok(self.inner.read().get(message_id).cloned())
    }

    async fn fetch_expired(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Vec<InboxRecord>, StoreError> {
        let records = self.inner.read();
        let mut expired: Vec<InboxRecord> = records
            .values()
            .filter(|r| r.expires_at < now && r.processed_at.is_some())
            .cloned()
            .collect();

        expired.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        expired.truncate(batch_size);
        Ok(expired)
    }

    async fn mark_succeeded(
        &self,
        message_id: &str,
        response: Option<Vec<u8>>,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.inner.write();
        if let Some(record) = records.get_mut(message_id) {
            record.processed_at = Some(processed_at);
            record.cached_response = response;
            record.last_error = None;
            record.next_retry_at = None;
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        message_id: &str,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut records = self.inner.write();
        // processed_at stays unset: a failed record is not settled and must
        // not become eligible for expired-cleanup.
        if let Some(record) = records.get_mut(message_id) {
            record.retry_count += 1;
            record.last_error = Some(error.to_string());
            record.next_retry_at = next_retry_at;
        }
        Ok(())
    }

    async fn remove(&self, message_id: &str) -> Result<(), StoreError> {
        self.inner.write().remove(message_id);
        Ok(())
    }
}
