//! PostgreSQL outbox store.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE duroq_outbox (
//!     id              UUID PRIMARY KEY,
//!     payload_type    TEXT NOT NULL,
//!     payload         BYTEA NOT NULL,
//!     created_at      TIMESTAMPTZ NOT NULL,
//!     processed_at    TIMESTAMPTZ,
//!     last_error      TEXT,
//!     retry_count     INT NOT NULL DEFAULT 0,
//!     next_retry_at   TIMESTAMPTZ
//! );
//!
//! CREATE INDEX idx_duroq_outbox_pending ON duroq_outbox(created_at)
//!     WHERE processed_at IS NULL;
//! ```

use crate::backend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duroq_core::port::error::StoreError;
use duroq_core::port::outbox::{OutboxRecord, OutboxStore};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct OutboxRow {
    id: Uuid,
    payload_type: String,
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    retry_count: i32,
    next_retry_at: Option<DateTime<Utc>>,
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        Self {
            id: row.id,
            payload_type: row.payload_type,
            payload: row.payload,
            created_at: row.created_at,
            processed_at: row.processed_at,
            last_error: row.last_error,
            retry_count: row.retry_count.max(0) as u32,
            next_retry_at: row.next_retry_at,
        }
    }
}

const COLUMNS: &str = "id, payload_type, payload, created_at, processed_at, \
                       last_error, retry_count, next_retry_at";

/// A PostgreSQL-backed outbox store.
#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the outbox table and its pending-scan index.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS duroq_outbox (
                id              UUID PRIMARY KEY,
                payload_type    TEXT NOT NULL,
                payload         BYTEA NOT NULL,
                created_at      TIMESTAMPTZ NOT NULL,
                processed_at    TIMESTAMPTZ,
                last_error      TEXT,
                retry_count     INT NOT NULL DEFAULT 0,
                next_retry_at   TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_duroq_outbox_pending
            ON duroq_outbox(created_at)
            WHERE processed_at IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn add(&self, record: OutboxRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO duroq_outbox (
                id, payload_type, payload, created_at, processed_at,
                last_error, retry_count, next_retry_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(record.id)
        .bind(&record.payload_type)
        .bind(&record.payload)
        .bind(record.created_at)
        .bind(record.processed_at)
        .bind(&record.last_error)
        .bind(record.retry_count as i32)
        .bind(record.next_retry_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::duplicate_key(record.id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutboxRecord>, StoreError> {
        let row = sqlx::query_as::<_, OutboxRow>(&format!(
            "SELECT {COLUMNS} FROM duroq_outbox WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(Into::into))
    }

    async fn fetch_pending(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        batch_size: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let rows = sqlx::query_as::<_, OutboxRow>(&format!(
            r#"SELECT {COLUMNS}
            FROM duroq_outbox
            WHERE processed_at IS NULL
              AND retry_count < $1
              AND (next_retry_at IS NULL OR next_retry_at <= $2)
            ORDER BY created_at ASC
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
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE duroq_outbox
            SET processed_at = $2, last_error = NULL, next_retry_at = NULL
            WHERE id = $1"#,
        )
        .bind(id)
        .bind(processed_at)
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
            r#"UPDATE duroq_outbox
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
}
