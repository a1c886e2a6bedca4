//! Saga coordinator.
//!
//! Manages the saga lifecycle against the [`SagaStore`]: creation, step
//! advancement, guarded status transitions, and the stuck-saga scan. Illegal
//! transitions are surfaced to the caller as [`SagaError::InvalidTransition`];
//! that is caller misuse and is never retried by this engine.

use crate::port::clock::Clock;
use crate::port::error::StoreError;
use crate::port::saga::{SagaRecord, SagaStatus, SagaStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Errors surfaced by coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    #[error("saga not found: {0}")]
    NotFound(Uuid),

    #[error("invalid saga transition from {from} to {to}")]
    InvalidTransition { from: SagaStatus, to: SagaStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coordinates saga lifecycle and stuck-instance detection.
pub struct SagaCoordinator {
    store: Arc<dyn SagaStore>,
    clock: Arc<dyn Clock>,
}

impl SagaCoordinator {
    pub fn new(store: Arc<dyn SagaStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Begin a new saga: `Running`, step 0.
    pub async fn create(
        &self,
        saga_type: impl Into<String>,
        initial_data: Vec<u8>,
    ) -> Result<SagaRecord, SagaError> {
        let record = SagaRecord::new(saga_type, initial_data, self.clock.now());
        self.store.add(record.clone()).await?;
        info!(saga_id = %record.saga_id, saga_type = %record.saga_type, "saga started");
        Ok(record)
    }

    /// Fetch a saga by id.
    pub async fn get(&self, saga_id: Uuid) -> Result<SagaRecord, SagaError> {
        self.load(saga_id).await
    }

    /// Persist new workflow state and step index without changing status.
    /// Only a `Running` saga can advance.
    pub async fn advance(
        &self,
        saga_id: Uuid,
        new_data: Vec<u8>,
        new_step: u32,
    ) -> Result<SagaRecord, SagaError> {
        let mut record = self.load(saga_id).await?;
        if record.status != SagaStatus::Running {
            return Err(SagaError::InvalidTransition {
                from: record.status,
                to: SagaStatus::Running,
            });
        }

        record.data = new_data;
        record.current_step = new_step;
        record.last_updated_at = self.clock.now();
        self.store.save(record.clone()).await?;
        debug!(saga_id = %saga_id, step = new_step, "saga advanced");
        Ok(record)
    }

    /// Transition a `Running` saga to `Completed`.
    pub async fn complete(&self, saga_id: Uuid) -> Result<SagaRecord, SagaError> {
        self.transition(saga_id, SagaStatus::Completed, None).await
    }

    /// Transition a `Running` saga to `Failed`, recording the error.
    pub async fn fail(&self, saga_id: Uuid, error: &str) -> Result<SagaRecord, SagaError> {
        self.transition(saga_id, SagaStatus::Failed, Some(error)).await
    }

    /// Transition a `Running` saga to `Compensating`.
    pub async fn begin_compensation(&self, saga_id: Uuid) -> Result<SagaRecord, SagaError> {
        self.transition(saga_id, SagaStatus::Compensating, None).await
    }

    /// Transition a `Compensating` saga to `Compensated`.
    pub async fn compensated(&self, saga_id: Uuid) -> Result<SagaRecord, SagaError> {
        self.transition(saga_id, SagaStatus::Compensated, None).await
    }

    /// Non-terminal sagas with no mutation for at least `older_than`.
    ///
    /// Detection only: each result is a candidate for operator alerting or
    /// compensation triggering, both of which live outside this engine.
    pub async fn find_stuck(
        &self,
        older_than: Duration,
        batch_size: usize,
    ) -> Result<Vec<SagaRecord>, SagaError> {
        let cutoff = self.clock.now() - to_chrono(older_than);
        Ok(self.store.fetch_stuck(cutoff, batch_size).await?)
    }

    async fn transition(
        &self,
        saga_id: Uuid,
        to: SagaStatus,
        error: Option<&str>,
    ) -> Result<SagaRecord, SagaError> {
        let mut record = self.load(saga_id).await?;
        if !record.status.can_transition_to(to) {
            return Err(SagaError::InvalidTransition {
                from: record.status,
                to,
            });
        }

        let now = self.clock.now();
        record.status = to;
        record.last_updated_at = now;
        if let Some(message) = error {
            record.last_error = Some(message.to_string());
        }
        if matches!(to, SagaStatus::Completed | SagaStatus::Compensated) {
            record.completed_at = Some(now);
        }

        self.store.save(record.clone()).await?;
        info!(saga_id = %saga_id, status = %to, "saga transition");
        Ok(record)
    }

    async fn load(&self, saga_id: Uuid) -> Result<SagaRecord, SagaError> {
        self.store
            .get(saga_id)
            .await?
            .ok_or(SagaError::NotFound(saga_id))
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}
