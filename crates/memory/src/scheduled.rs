//! In-memory implementation of the scheduled store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duroq_core::port::error::StoreError;
use duroq_core::port::scheduled::{ScheduledRecord, ScheduledStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// In-memory scheduled store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryScheduledStore {
    inner: Arc<RwLock<HashMap<Uuid, ScheduledRecord>>>,
}

impl InMemoryScheduledStore {
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
impl ScheduledStore for InMemoryScheduledStore {
    async fn add(&self, record: ScheduledRecord) -> Result<(), StoreError> {
        let mut records = self.inner.write();
        if records.contains_key(&record.id) {
            return Err(StoreError::duplicate_key(record.id.to_string()));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ScheduledRecord>, StoreError> {
        Ok(self.inner.read().get(&id).cloned())
    }

    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        batch_size: usize,
    ) -> Result<Vec<ScheduledRecord>, StoreError> {
        let records = self.inner.read();
        let mut due: Vec<ScheduledRecord> = records
            .values()
            .filter(|r| {
                let active = r.processed_at.is_none() || r.is_recurring;
                let due_now = match r.next_retry_at {
                    Some(retry_at) => retry_at <= now,
                    None => r.scheduled_at <= now,
                };
                active && r.retry_count < max_retries && due_now
            })
            .cloned()
            .collect();

        due.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        due.truncate(batch_size);
        Ok(due)
    }

    async fn mark_succeeded(
        &self,
        id: Uuid,
        executed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.inner.write();
        if let Some(record) = records.get_mut(&id) {
            record.processed_at = Some(executed_at);
            record.last_executed_at = Some(executed_at);
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

    async fn reschedule(
        &self,
        id: Uuid,
        next_at: DateTime<Utc>,
        executed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.inner.write();
        if let Some(record) = records.get_mut(&id) {
            record.scheduled_at = next_at;
            record.last_executed_at = Some(executed_at);
            record.processed_at = None;
            record.last_error = None;
            record.retry_count = 0;
            record.next_retry_at = None;
        }
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.write().remove(&id);
        Ok(())
    }
}
