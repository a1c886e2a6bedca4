//! Saga store port.
//!
//! A [`SagaRecord`] holds the orchestration state of one long-running
//! workflow instance. Status transitions are monotonic along the state
//! machine enforced by the coordinator; `last_updated_at` is refreshed on
//! every mutation and is the sole signal for stuck-saga detection.

use super::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a saga instance.
///
/// Legal transitions: `Running -> {Completed, Failed, Compensating}` and
/// `Compensating -> Compensated`. `Completed`, `Failed` and `Compensated`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Running,
    Completed,
    Failed,
    Compensating,
    Compensated,
}

impl SagaStatus {
    /// Whether this status permits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Compensated)
    }

    /// Whether the state machine permits moving to `next`.
    pub fn can_transition_to(self, next: SagaStatus) -> bool {
        matches!(
            (self, next),
            (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Compensating)
                | (Self::Compensating, Self::Compensated)
        )
    }

    /// Database string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Compensating => "COMPENSATING",
            Self::Compensated => "COMPENSATED",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SagaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "COMPENSATING" => Ok(Self::Compensating),
            "COMPENSATED" => Ok(Self::Compensated),
            _ => Err(format!("invalid saga status: {s}")),
        }
    }
}

/// Orchestration state for one workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaRecord {
    /// Unique saga identifier.
    pub saga_id: Uuid,
    /// Workflow type name.
    pub saga_type: String,
    /// Serialized workflow state, owned by the step handlers.
    pub data: Vec<u8>,
    /// Current lifecycle status.
    pub status: SagaStatus,
    /// Index of the step the workflow has reached.
    pub current_step: u32,
    /// When the saga began.
    pub started_at: DateTime<Utc>,
    /// Refreshed on every mutation; drives stuck-saga detection.
    pub last_updated_at: DateTime<Utc>,
    /// Set when the saga reaches `Completed` or `Compensated`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Last recorded error, if any.
    pub last_error: Option<String>,
}

impl SagaRecord {
    /// Create a running saga at step 0.
    pub fn new(saga_type: impl Into<String>, data: Vec<u8>, started_at: DateTime<Utc>) -> Self {
        Self {
            saga_id: Uuid::new_v4(),
            saga_type: saga_type.into(),
            data,
            status: SagaStatus::Running,
            current_step: 0,
            started_at,
            last_updated_at: started_at,
            completed_at: None,
            last_error: None,
        }
    }
}

/// Persistence port for saga records.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Insert a new saga. Fails with [`StoreError::DuplicateKey`] if the id
    /// collides.
    async fn add(&self, record: SagaRecord) -> Result<(), StoreError>;

    /// Fetch a saga by id.
    async fn get(&self, saga_id: Uuid) -> Result<Option<SagaRecord>, StoreError>;

    /// Persist the full record. A no-op for unknown ids.
    async fn save(&self, record: SagaRecord) -> Result<(), StoreError>;

    /// Fetch up to `batch_size` non-terminal sagas whose `last_updated_at`
    /// is older than `cutoff`, stalest first.
    async fn fetch_stuck(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Vec<SagaRecord>, StoreError>;
}
