//! PostgreSQL inbox store.
//!
//! The `message_id` primary key is the claim: concurrent inserts for the same
//! key race on the constraint and exactly one wins.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE duroq_inbox (
//!     message_id      TEXT PRIMARY KEY,
//!     request_type    TEXT NOT NULL,
//!     received_at     TIMESTAMPTZ NOT NULL,
//!     processed_at    TIMESTAMPTZ,
//!     expires_at      TIMESTAMPTZ NOT NULL,
//!     cached_response BYTEA,
//!     last_error      TEXT,
//!     retry_count     INT NOT NULL DEFAULT 0,
//!     next_retry_at   TIMESTAMPTZ
//! );
//!
//! CREATE INDEX idx_duroq_inbox_expired ON duroq_inbox(expires_at)
//!     WHERE processed_at IS NOT NULL;
//! ```

use crate::backend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duroq_core::port::error::StoreError;
use duroq_core::port::inbox::{InboxRecord, InboxStore};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, FromRow)]
struct InboxRow {
    message_id: String,
    request_type: String,
    received_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    cached_response: Option<Vec<u8>>,
    last_error: Option<String>,
    retry_count: i32,
    next_retry_at: Option<DateTime<Utc>>,
}

impl From<InboxRow> for InboxRecord {
    fn from(row: InboxRow) -> Self {
        Self {
            message_id: row.message_id,
            request_type: row.request_type,
            received_at: row.received_at,
            processed_at: row.processed_at,
            expires_at: row.expires_at,
            cached_response: row.cached_response,
            last_error: row.last_error,
            retry_count: row.retry_count.max(0) as u32,
            next_retry_at: row.next_retry_at,
        }
    }
}

const COLUMNS: &str = "message_id, request_type, received_at, processed_at, \
                       expires_at, cached_response, last_error, retry_count, next_retry_at";

/// A PostgreSQL-backed inbox store.
#[derive(Debug, Clone)]
pub struct PostgresInboxStore {
    pool: PgPool,
}

impl PostgresInboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the inbox table and its expiry-scan index.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS duroq_inbox (
                message_id      TEXT PRIMARY KEY,
                request_type    TEXT NOT NULL,
                received_at     TIMESTAMPTZ NOT NULL,
                processed_at    TIMESTAMPTZ,
                expires_at      TIMESTAMPTZ NOT NULL,
                cached_response BYTEA,
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
            CREATE INDEX IF NOT EXISTS idx_duroq_inbox_expired
            ON duroq_inbox(expires_at)
            WHERE processed_at IS NOT NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl InboxStore for PostgresInboxStore {
    async fn add(&self, record: InboxRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO duroq_inbox (
                message_id, request_type, received_at, processed_at,
                expires_at, cached_response, last_error, retry_count, next_retry_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (message_id) DO NOTHING"#,
        )
        .bind(&record.message_id)
        .bind(&record.request_type)
        .bind(record.received_at)
        .bind(record.processed_at)
        .bind(record.expires_at)
        .bind(&record.cached_response)
        .bind(&record.last_error)
        .bind(record.retry_count as i32)
        .bind(record.next_retry_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::duplicate_key(record.message_id));
        }
        Ok(())
    }

    async fn get(&self, message_id: &str) -> Result<Option<InboxRecord>, StoreError> {
        let row = sqlx::query_as::<_, InboxRow>(&format!(
            "SELECT {COLUMNS} FROM duroq_inbox WHERE message_id = $1"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(Into::into))
    }

    async fn fetch_expired(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Vec<InboxRecord>, StoreError> {
        let rows = sqlx::query_as::<_, InboxRow>(&format!(
            r#"SELECT {COLUMNS}
            FROM duroq_inbox
            WHERE expires_at < $1 AND processed_at IS NOT NULL
            ORDER BY expires_at ASC
            LIMIT $2"#
        ))
        .bind(now)
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_succeeded(
        &self,
        message_id: &str,
        response: Option<Vec<u8>>,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE duroq_inbox
            SET processed_at = $2, cached_response = $3,
                last_error = NULL, next_retry_at = NULL
            WHERE message_id = $1"#,
        )
        .bind(message_id)
        .bind(processed_at)
        .bind(&response)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        message_id: &str,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        // processed_at stays NULL: a failed record is not settled and must
        // not become eligible for expired-cleanup.
        sqlx::query(
            r#"UPDATE duroq_inbox
            SET retry_count = retry_count + 1, last_error = $2, next_retry_at = $3
            WHERE message_id = $1"#,
        )
        .bind(message_id)
        .bind(error)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn remove(&self, message_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM duroq_inbox WHERE message_id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(())
    }
}
