//! Error types for the sync engine.

use cloudcache_codec::{AssetError, CodecError};
use cloudcache_protocol::{classify, FailReason, RemoteError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote store rejected a bootstrap or maintenance call.
    #[error("remote store error: {0}")]
    Remote(#[from] RemoteError),

    /// A change feed ended with a failure.
    #[error("change feed failed: {0}")]
    Feed(#[from] FailReason),

    /// The local store could not read or write a cursor or subscription id.
    #[error("local store error: {0}")]
    Store(String),

    /// The cache delegate could not apply a change.
    #[error("cache delegate error: {0}")]
    Delegate(String),

    /// An entity could not be converted.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The local blob cache failed.
    #[error("asset error: {0}")]
    Asset(#[from] AssetError),

    /// A feed or background task ended abnormally.
    #[error("task error: {0}")]
    Task(String),
}

impl SyncError {
    /// Creates a local store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Creates a delegate error.
    pub fn delegate(message: impl Into<String>) -> Self {
        Self::Delegate(message.into())
    }

    /// Returns true if the failure is expected to heal by itself.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(error) => classify(Some(error)).is_self_healing(),
            SyncError::Feed(FailReason::Network(_)) => true,
            _ => false,
        }
    }
}
