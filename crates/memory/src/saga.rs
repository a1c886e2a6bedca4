//! In-memory implementation of the saga store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duroq_core::port::error::StoreError;
use duroq_core::port::saga::{SagaRecord, SagaStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// In-memory saga store.
#[derive(Debug, Default, Clone)]
pub struct InMemorySagaStore {
    inner: Arc<RwLock<HashMap<Uuid, SagaRecord>>>,
}

impl InMemorySagaStore {
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
impl SagaStore for InMemorySagaStore {
    async fn add(&self, record: SagaRecord) -> Result<(), StoreError> {
        let mut records = self.inner.write();
        if records.contains_key(&record.saga_id) {
            return Err(StoreError::duplicate_key(record.saga_id.to_string()));
        }
        records.insert(record.saga_id, record);
        Ok(())
    }

    async fn get(&self, saga_id: Uuid) -> Result<Option<SagaRecord>, StoreError> {
        Ok(self.inner.read().get(&saga_id).cloned())
    }

    async fn save(&self, record: SagaRecord) -> Result<(), StoreError> {
        let mut records = self.inner.write();
        if let Some(existing) = records.get_mut(&record.saga_id) {
            *existing = record;
        }
        Ok(())
    }

    async fn fetch_stuck(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Vec<SagaRecord>, StoreError> {
        let records = self.inner.read();
        let mut stuck: Vec<SagaRecord> = records
            .values()
            .filter(|r| !r.status.is_terminal() && r.last_updated_at < cutoff)
            .cloned()
            .collect();

        stuck.sort_by(|a, b| a.last_updated_at.cmp(&b.last_updated_at));
        stuck.truncate(batch_size);
        Ok(stuck)
    }
}
