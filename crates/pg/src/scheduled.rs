//! PostgreSQL scheduled store.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE duroq_scheduled (
//!     id               UUID PRIMARY KEY,
//!     request_type     TEXT NOT NULL,
//!     payload          BYTEA NOT NULL,
//!     scheduled_at     TIMESTAMPTZ NOT NULL,
//!     created_at       TIMESTAMPTZ NOT NULL,
//!     processed_at     TIMESTAMPTZ,
//!     last_executed_at TIMESTAMPTZ,
//!     last_error       TEXT,
//!     retry_count      INT NOT NULL DEFAULT 0,
//!     next_retry_at    TIMESTAMPTZ,
//!     is_recurring     BOOLEAN NOT NULL DEFAULT FALSE,
//!     cron_expression  TEXT
//! );
//!
//! CREATE INDEX idx_duroq_scheduled_due ON duroq_scheduled(scheduled_at)
//!     WHERE processed_at IS NULL OR is_recurring;
//! ```

use crate::backend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duroq_core::port::error::StoreError;
use duroq_core::port::scheduled::{ScheduledRecord, ScheduledStore};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct ScheduledRow {
    id: Uuid,
    request_type: String,
    payload: Vec<u8>,
    scheduled_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    last_executed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    retry_count: i32,
    next_retry_at: Option<DateTime<Utc>>,
    is_recurring: bool,
    cron_expression: Option<String>,
}

impl From<ScheduledRow> for ScheduledRecord {
    fn from(row: ScheduledRow) -> Self {
        Self {
            id: row.id,
            request_type: row.request_type,
            payload: row.payload,
            scheduled_at: row.scheduled_at,
            created_at: row.created_at,
            processed_at: row.processed_at,
            last_executed_at: row.last_executed_at,
            last_error: row.last_error,
            retry_count: row.retry_count.max(0) as u32,
            next_retry_at: row.next_retry_at,
            is_recurring: row.is_recurring,
            cron_expression: row.cron_expression,
        }
    }
}

const COLUMNS: &str = "id, request_type, payload, scheduled_at, created_at, \
                       processed_at, last_executed_at, last_error, retry_count, \
                       next_retry_at, is_recurring, cron_expression";

/// A PostgreSQL-backed scheduled store.
#[derive(Debug, Clone)]
pub struct PostgresScheduledStore {
    pool: PgPool,
}

impl PostgresScheduledStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the scheduled table and its due-scan index.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS duroq_scheduled (
                id               UUID PRIMARY KEY,
                request_type     TEXT NOT NULL,
                payload          BYTEA NOT NULL,
                scheduled_at     TIMESTAMPTZ NOT NULL,
                created_at       TIMESTAMPTZ NOT NULL,
                processed_at     TIMESTAMPTZ,
                last_executed_at TIMESTAMPTZ,
                last_error       TEXT,
                retry_count      INT NOT NULL DEFAULT 0,
                next_retry_at    TIMESTAMPTZ,
                is_recurring     BOOLEAN NOT NULL DEFAULT FALSE,
                cron_expression  TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_duroq_scheduled_due
            ON duroq_scheduled(scheduled_at)
            WHERE processed_at IS NULL OR is_recurring
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ScheduledStore for PostgresScheduledStore {
    async fn add(&self, record: ScheduledRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO duroq_scheduled (
                id, request_type, payload, scheduled_at, created_at,
                processed_at, last_executed_at, last_error, retry_count,
                next_retry_at, is_recurring, cron_expression
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(record.id)
        .bind(&record.request_type)
        .bind(&record.payload)
        .bind(record.scheduled_at)
        .bind(record.created_at)
        .bind(record.processed_at)
        .bind(record.last_executed_at)
        .bind(&record.last_error)
        .bind(record.retry_count as i32)
        .bind(record.next_retry_at)
        .bind(record.is_recurring)
        .bind(&record.cron_expression)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::duplicate_key(record.id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ScheduledRecord>, StoreError> {
        let row = sqlx::query_as::<_, ScheduledRow>(&format!(
            "SELECT {COLUMNS} FROM duroq_scheduled WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(Into::into))
    }

    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        batch_size: usize,
    ) -> Result<Vec<ScheduledRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ScheduledRow>(&format!(
            r#"SELECT {COLUMNS}
            FROM duroq_scheduled
            WHERE (processed_at IS NULL OR is_recurring)
              AND retry_count < $1
              AND (
                (next_retry_at IS NOT NULL AND next_retry_at <= $2)
                OR (next_retry_at IS NULL AND scheduled_at <= $2)
              )
            ORDER BY scheduled_at ASC
            LIMIT $3
            FOR UPDATE SKIP LOCKED"#
        ))
        .bind(max_retries as i32)
        .bind(now)
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_succeeded(
        &self,
        id: Uuid,
        executed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE duroq_scheduled
            SET processed_at = $2, last_executed_at = $2,
                last_error = NULL, next_retry_at = NULL
            WHERE id = $1"#,
        )
        .bind(id)
        .bind(executed_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE duroq_scheduled
            SET retry_count = retry_count + 1, last_error = $2, next_retry_at = $3
            WHERE id = $1"#,
        )
        .bind(id)
        .bind(error)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        next_at: DateTime<Utc>,
        executed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE duroq_scheduled
            SET scheduled_at = $2, last_executed_at = $3, processed_at = NULL,
                last_error = NULL, retry_count = 0, next_retry_at = NULL
            WHERE id = $1"#,
        )
        .bind(id)
        .bind(next_at)
        .bind(executed_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM duroq_scheduled WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(())
    }
}
