//! Request dispatcher port.

use crate::codec::Payload;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A dispatch attempt that did not succeed.
///
/// Expected business failures arrive as `Failed`; the engine treats both
/// variants the same way (log, classify, retry per policy). Dispatcher
/// timeouts are the dispatcher's responsibility; a hang is observationally a
/// failure to be retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchFailure {
    #[error("dispatch failed: {0}")]
    Failed(String),

    #[error("dispatch cancelled")]
    Cancelled,
}

impl DispatchFailure {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Executes application logic for a materialized payload.
///
/// The optional response bytes are what the Inbox Guard caches and replays
/// for duplicate requests; the Outbox and Scheduler processors ignore them.
#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        payload: Payload,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, DispatchFailure>;
}
