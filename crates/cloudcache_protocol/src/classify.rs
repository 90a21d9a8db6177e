//! Classification of remote failures into retry, resync or fatal decisions.
//!
//! Classification happens once, at the feed boundary. Callers act on the
//! returned `ResultType` and never inspect the raw error again.

use crate::error::{ErrorCode, RemoteError};
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// Why an operation could not complete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    /// The change cursor is too old; the client must resync from scratch.
    #[error("change token expired: {0}")]
    ChangeTokenExpired(String),
    /// The network is unreachable or failed transiently.
    #[error("network: {0}")]
    Network(String),
    /// The user's storage quota is exhausted.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    /// Some items of a batch failed.
    #[error("partial failure: {0}")]
    PartialFailure(String),
    /// The server holds a different version of the record.
    #[error("server record changed: {0}")]
    ServerRecordChanged(String),
    /// Sharing, participant or permission failure.
    #[error("share related: {0}")]
    ShareRelated(String),
    /// A code this client has no policy for.
    #[error("unhandled error code: {0}")]
    UnhandledCode(String),
    /// Anything else.
    #[error("unknown: {0}")]
    Unknown(String),
}

/// The decision derived from an operation's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultType {
    /// The operation succeeded.
    Success,
    /// Re-run the same operation after the server-suggested delay.
    Retry {
        /// Delay before re-running.
        after: Duration,
        /// Description of the failure.
        message: String,
    },
    /// The request was too large; reduce the batch size and re-run.
    Chunk,
    /// The caller can recover, for some reasons only by resyncing.
    Recoverable(FailReason),
    /// Give up and surface the reason.
    Fatal(FailReason),
}

impl ResultType {
    /// Returns true for outcomes that heal without caller intervention.
    pub fn is_self_healing(&self) -> bool {
        matches!(
            self,
            ResultType::Retry { .. } | ResultType::Recoverable(FailReason::Network(_))
        )
    }
}

/// Classifies the outcome of a remote operation.
pub fn classify(error: Option<&RemoteError>) -> ResultType {
    let Some(error) = error else {
        return ResultType::Success;
    };

    let message = error.code.description();

    match error.code {
        ErrorCode::ServiceUnavailable | ErrorCode::RequestRateLimited | ErrorCode::ZoneBusy => {
            match error.retry_after {
                Some(after) => {
                    error!(%message, ?after, "retryable remote error");
                    ResultType::Retry { after, message }
                }
                None => {
                    error!(%message, "retryable remote error without a retry hint");
                    ResultType::Fatal(FailReason::Unknown(message))
                }
            }
        }

        ErrorCode::NetworkUnavailable | ErrorCode::NetworkFailure => {
            error!(%message, "recoverable network error");
            ResultType::Recoverable(FailReason::Network(message))
        }
        ErrorCode::ChangeTokenExpired => {
            error!(%message, "change token expired");
            ResultType::Recoverable(FailReason::ChangeTokenExpired(message))
        }
        ErrorCode::ServerRecordChanged => {
            error!(%message, "server record changed");
            ResultType::Recoverable(FailReason::ServerRecordChanged(message))
        }
        ErrorCode::PartialFailure => {
            if let Some(count) = error.partial_failures {
                error!(%message, items = count, "partial failure");
            } else {
                error!(%message, "partial failure");
            }
            ResultType::Recoverable(FailReason::PartialFailure(message))
        }

        ErrorCode::LimitExceeded => {
            error!(%message, "request too large, chunking");
            ResultType::Chunk
        }

        ErrorCode::AlreadyShared
        | ErrorCode::ParticipantMayNeedVerification
        | ErrorCode::ReferenceViolation
        | ErrorCode::TooManyParticipants
        | ErrorCode::PermissionFailure => {
            error!(%message, "share related failure");
            ResultType::Fatal(FailReason::ShareRelated(message))
        }
        // Needs user action (free up storage) before any retry makes sense.
        ErrorCode::QuotaExceeded => {
            error!(%message, "quota exceeded");
            ResultType::Fatal(FailReason::QuotaExceeded(message))
        }

        _ => {
            error!(%message, "unhandled remote error");
            ResultType::Fatal(FailReason::UnhandledCode(message))
        }
    }
}
