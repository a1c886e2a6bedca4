//! Error type shared by the store ports.

use thiserror::Error;

/// Errors surfaced by store implementations.
///
/// `DuplicateKey` is part of the contract: the Inbox Guard's atomic claim is
/// an insert that loses to a concurrent caller by observing this variant.
/// Everything else a backend can fail with is folded into `Backend`; the
/// engine classifies, logs and retries without branching on backend detail.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create a duplicate-key error for the given primary key.
    pub fn duplicate_key(key: impl Into<String>) -> Self {
        Self::DuplicateKey(key.into())
    }

    /// Wrap a backend failure.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}
