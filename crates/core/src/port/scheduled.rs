//! Scheduled store port.
//!
//! A [`ScheduledRecord`] is a command deferred to a future time, optionally
//! recurring on a cron expression. Non-recurring records settle once;
//! recurring records are perpetually rescheduled to the next occurrence
//! strictly after each successful run. A recurring record that exhausts its
//! retry budget stops firing until manually rescheduled; dead-letter takes
//! priority over recurrence.

use super::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Errors from validating a cron expression at record creation.
#[derive(Debug, thiserror::Error)]
pub enum CronParseError {
    #[error("invalid cron expression '{expression}': {source}")]
    Invalid {
        expression: String,
        #[source]
        source: cron::error::Error,
    },

    #[error("cron expression '{0}' has no upcoming occurrence")]
    NoOccurrence(String),
}

/// A command deferred to a future time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledRecord {
    /// Unique record identifier.
    pub id: Uuid,
    /// Type name the codec uses to resolve the payload.
    pub request_type: String,
    /// Serialized payload bytes.
    pub payload: Vec<u8>,
    /// Next (or only) due time.
    pub scheduled_at: DateTime<Utc>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Meaningful only for non-recurring records; a successful recurring run
    /// resets this to `None`.
    pub processed_at: Option<DateTime<Utc>>,
    /// When the command last ran successfully.
    pub last_executed_at: Option<DateTime<Utc>>,
    /// Last dispatch error, if any.
    pub last_error: Option<String>,
    /// Number of failed attempts since the last successful run.
    pub retry_count: u32,
    /// Earliest next attempt after a failure.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Whether the record fires repeatedly.
    pub is_recurring: bool,
    /// Cron expression; present iff `is_recurring`.
    pub cron_expression: Option<String>,
}

impl ScheduledRecord {
    /// Create a one-shot command due at `scheduled_at`.
    pub fn one_shot(
        request_type: impl Into<String>,
        payload: Vec<u8>,
        scheduled_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_type: request_type.into(),
            payload,
            scheduled_at,
            created_at,
            processed_at: None,
            last_executed_at: None,
            last_error: None,
            retry_count: 0,
            next_retry_at: None,
            is_recurring: false,
            cron_expression: None,
        }
    }

    /// Create a recurring command.
    ///
    /// Validates the expression up front and schedules the first occurrence
    /// strictly after `created_at`, so the processor's parse-failure path
    /// only fires for records written by other producers.
    pub fn recurring(
        request_type: impl Into<String>,
        payload: Vec<u8>,
        cron_expression: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self, CronParseError> {
        let schedule =
            Schedule::from_str(cron_expression).map_err(|source| CronParseError::Invalid {
                expression: cron_expression.to_string(),
                source,
            })?;
        let first = schedule
            .after(&created_at)
            .next()
            .ok_or_else(|| CronParseError::NoOccurrence(cron_expression.to_string()))?;

        let mut record = Self::one_shot(request_type, payload, first, created_at);
        record.is_recurring = true;
        record.cron_expression = Some(cron_expression.to_string());
        Ok(record)
    }

    /// Whether a non-recurring record has permanently settled. Recurring
    /// records never settle.
    pub fn is_settled(&self) -> bool {
        !self.is_recurring && self.processed_at.is_some()
    }
}

/// Persistence port for scheduled records.
#[async_trait]
pub trait ScheduledStore: Send + Sync {
    /// Insert a new record. Fails with [`StoreError::DuplicateKey`] if the id
    /// collides.
    async fn add(&self, record: ScheduledRecord) -> Result<(), StoreError>;

    /// Fetch a record by id.
    async fn get(&self, id: Uuid) -> Result<Option<ScheduledRecord>, StoreError>;

    /// Fetch up to `batch_size` due records, earliest `scheduled_at` first.
    ///
    /// Due means: unsettled (or recurring), `retry_count < max_retries`, and
    /// either due for retry (`next_retry_at <= now`) or never failed and past
    /// its scheduled time.
    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        batch_size: usize,
    ) -> Result<Vec<ScheduledRecord>, StoreError>;

    /// Settle a non-recurring record. Idempotent; a no-op for unknown ids.
    async fn mark_succeeded(
        &self,
        id: Uuid,
        executed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record a failed attempt: increments `retry_count`, stores the error
    /// and the next retry time (`None` dead-letters the record). A no-op for
    /// unknown ids.
    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Advance a recurring record after a successful run: resets
    /// `processed_at`, `last_error` and `retry_count`, sets `scheduled_at` to
    /// `next_at` and `last_executed_at` to `executed_at`. Also the manual
    /// recovery path for dead-lettered recurring records. A no-op for
    /// unknown ids.
    async fn reschedule(
        &self,
        id: Uuid,
        next_at: DateTime<Utc>,
        executed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Physically delete a record. Explicit cancellation.
    async fn remove(&self, id: Uuid) -> Result<(), StoreError>;
}
