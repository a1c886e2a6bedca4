//! PostgreSQL saga store.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE duroq_sagas (
//!     saga_id         UUID PRIMARY KEY,
//!     saga_type       TEXT NOT NULL,
//!     data            BYTEA NOT NULL,
//!     status          VARCHAR(20) NOT NULL,
//!     current_step    INT NOT NULL DEFAULT 0,
//!     started_at      TIMESTAMPTZ NOT NULL,
//!     last_updated_at TIMESTAMPTZ NOT NULL,
//!     completed_at    TIMESTAMPTZ,
//!     last_error      TEXT
//! );
//!
//! CREATE INDEX idx_duroq_sagas_active ON duroq_sagas(last_updated_at)
//!     WHERE status IN ('RUNNING', 'COMPENSATING');
//! ```

use crate::backend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duroq_core::port::error::StoreError;
use duroq_core::port::saga::{SagaRecord, SagaStatus, SagaStore};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct SagaRow {
    saga_id: Uuid,
    saga_type: String,
    data: Vec<u8>,
    status: String,
    current_step: i32,
    started_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl TryFrom<SagaRow> for SagaRecord {
    type Error = StoreError;

    // An unreadable status must surface, not default: coercing it to a
    // non-terminal status would let guarded transitions run on a saga that
    // may already be terminal.
    fn try_from(row: SagaRow) -> Result<Self, StoreError> {
        let status = row.status.parse().map_err(StoreError::backend)?;
        Ok(Self {
            saga_id: row.saga_id,
            saga_type: row.saga_type,
            data: row.data,
            status,
            current_step: row.current_step.max(0) as u32,
            started_at: row.started_at,
            last_updated_at: row.last_updated_at,
            completed_at: row.completed_at,
            last_error: row.last_error,
        })
    }
}

const COLUMNS: &str = "saga_id, saga_type, data, status, current_step, \
                       started_at, last_updated_at, completed_at, last_error";

/// A PostgreSQL-backed saga store.
#[derive(Debug, Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the saga table and its stuck-scan index.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS duroq_sagas (
                saga_id         UUID PRIMARY KEY,
                saga_type       TEXT NOT NULL,
                data            BYTEA NOT NULL,
                status          VARCHAR(20) NOT NULL,
                current_step    INT NOT NULL DEFAULT 0,
                started_at      TIMESTAMPTZ NOT NULL,
                last_updated_at TIMESTAMPTZ NOT NULL,
                completed_at    TIMESTAMPTZ,
                last_error      TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_duroq_sagas_active
            ON duroq_sagas(last_updated_at)
            WHERE status IN ('RUNNING', 'COMPENSATING')
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn add(&self, record: SagaRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO duroq_sagas (
                saga_id, saga_type, data, status, current_step,
                started_at, last_updated_at, completed_at, last_error
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (saga_id) DO NOTHING"#,
        )
        .bind(record.saga_id)
        .bind(&record.saga_type)
        .bind(&record.data)
        .bind(record.status.as_str())
        .bind(record.current_step as i32)
        .bind(record.started_at)
        .bind(record.last_updated_at)
        .bind(record.completed_at)
        .bind(&record.last_error)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::duplicate_key(record.saga_id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, saga_id: Uuid) -> Result<Option<SagaRecord>, StoreError> {
        let row = sqlx::query_as::<_, SagaRow>(&format!(
            "SELECT {COLUMNS} FROM duroq_sagas WHERE saga_id = $1"
        ))
        .bind(saga_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(SagaRecord::try_from).transpose()
    }

    async fn save(&self, record: SagaRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE duroq_sagas
            SET saga_type = $2, data = $3, status = $4, current_step = $5,
                started_at = $6, last_updated_at = $7, completed_at = $8,
                last_error = $9
            WHERE saga_id = $1"#,
        )
        .bind(record.saga_id)
        .bind(&record.saga_type)
        .bind(&record.data)
        .bind(record.status.as_str())
        .bind(record.current_step as i32)
        .bind(record.started_at)
        .bind(record.last_updated_at)
        .bind(record.completed_at)
        .bind(&record.last_error)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn fetch_stuck(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Vec<SagaRecord>, StoreError> {
        let rows = sqlx::query_as::<_, SagaRow>(&format!(
            r#"SELECT {COLUMNS}
            FROM duroq_sagas
            WHERE status IN ('RUNNING', 'COMPENSATING')
              AND last_updated_at < $1
            ORDER BY last_updated_at ASC
            LIMIT $2"#
        ))
        .bind(cutoff)
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(SagaRecord::try_from).collect()
    }
}
