//! Remote-store error codes and protocol errors.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while handling protocol data locally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// System metadata could not be encoded.
    #[error("metadata encoding failed: {0}")]
    MetadataEncoding(String),

    /// System metadata could not be decoded.
    #[error("metadata decoding failed: {0}")]
    MetadataDecoding(String),
}

/// Failure codes reported by the remote store.
///
/// Numeric values are stable wire codes. Codes the client does not know
/// decode to `Unrecognized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum ErrorCode {
    InternalError,
    PartialFailure,
    NetworkUnavailable,
    NetworkFailure,
    BadContainer,
    ServiceUnavailable,
    RequestRateLimited,
    MissingEntitlement,
    NotAuthenticated,
    PermissionFailure,
    UnknownItem,
    InvalidArguments,
    ServerRecordChanged,
    ServerRejectedRequest,
    AssetFileNotFound,
    AssetFileModified,
    IncompatibleVersion,
    ConstraintViolation,
    OperationCancelled,
    ChangeTokenExpired,
    BatchRequestFailed,
    ZoneBusy,
    BadDatabase,
    QuotaExceeded,
    ZoneNotFound,
    LimitExceeded,
    UserDeletedZone,
    TooManyParticipants,
    AlreadyShared,
    ReferenceViolation,
    ManagedAccountRestricted,
    ParticipantMayNeedVerification,
    ServerResponseLost,
    Unrecognized(i64),
}

const KNOWN_CODES: &[(i64, ErrorCode)] = &[
    (1, ErrorCode::InternalError),
    (2, ErrorCode::PartialFailure),
    (3, ErrorCode::NetworkUnavailable),
    (4, ErrorCode::NetworkFailure),
    (5, ErrorCode::BadContainer),
    (6, ErrorCode::ServiceUnavailable),
    (7, ErrorCode::RequestRateLimited),
    (8, ErrorCode::MissingEntitlement),
    (9, ErrorCode::NotAuthenticated),
    (10, ErrorCode::PermissionFailure),
    (11, ErrorCode::UnknownItem),
    (12, ErrorCode::InvalidArguments),
    (14, ErrorCode::ServerRecordChanged),
    (15, ErrorCode::ServerRejectedRequest),
    (16, ErrorCode::AssetFileNotFound),
    (17, ErrorCode::AssetFileModified),
    (18, ErrorCode::IncompatibleVersion),
    (19, ErrorCode::ConstraintViolation),
    (20, ErrorCode::OperationCancelled),
    (21, ErrorCode::ChangeTokenExpired),
    (22, ErrorCode::BatchRequestFailed),
    (23, ErrorCode::ZoneBusy),
    (24, ErrorCode::BadDatabase),
    (25, ErrorCode::QuotaExceeded),
    (26, ErrorCode::ZoneNotFound),
    (27, ErrorCode::LimitExceeded),
    (28, ErrorCode::UserDeletedZone),
    (29, ErrorCode::TooManyParticipants),
    (30, ErrorCode::AlreadyShared),
    (31, ErrorCode::ReferenceViolation),
    (32, ErrorCode::ManagedAccountRestricted),
    (33, ErrorCode::ParticipantMayNeedVerification),
    (34, ErrorCode::ServerResponseLost),
];

impl ErrorCode {
    /// Decodes a numeric wire code.
    pub fn from_code(code: i64) -> Self {
        KNOWN_CODES
            .iter()
            .find(|(raw, _)| *raw == code)
            .map(|(_, known)| *known)
            .unwrap_or(ErrorCode::Unrecognized(code))
    }

    /// Returns the numeric wire code.
    pub fn code(&self) -> i64 {
        if let ErrorCode::Unrecognized(raw) = self {
            return *raw;
        }
        KNOWN_CODES
            .iter()
            .find(|(_, known)| known == self)
            .map(|(raw, _)| *raw)
            .unwrap_or(0)
    }

    /// Parses a code from its snake_case name or its number.
    pub fn parse(input: &str) -> Option<Self> {
        if let Ok(raw) = input.parse::<i64>() {
            return Some(Self::from_code(raw));
        }
        let normalized: String = input
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        KNOWN_CODES
            .iter()
            .map(|(_, known)| *known)
            .find(|known| format!("{known:?}").to_ascii_lowercase() == normalized)
    }

    /// A user-facing description, suffixed with the numeric code.
    pub fn description(&self) -> String {
        let text = match self {
            ErrorCode::AlreadyShared => "Already Shared: a record or share cannot be saved because doing so would cause the same hierarchy of records to exist in multiple shares.",
            ErrorCode::AssetFileModified => "Asset File Modified: the content of the specified asset file was modified while being saved.",
            ErrorCode::AssetFileNotFound => "Asset File Not Found: the specified asset file is not found.",
            ErrorCode::BadContainer => "Bad Container: the specified container is unknown or unauthorized.",
            ErrorCode::BadDatabase => "Bad Database: the operation could not be completed on the given database.",
            ErrorCode::BatchRequestFailed => "Batch Request Failed: the entire batch was rejected.",
            ErrorCode::ChangeTokenExpired => "Change Token Expired: the previous server change token is too old.",
            ErrorCode::ConstraintViolation => "Constraint Violation: the server rejected the request because of a conflict with a unique field.",
            ErrorCode::IncompatibleVersion => "Incompatible Version: your app version is older than the oldest version allowed.",
            ErrorCode::InternalError => "Internal Error: a nonrecoverable error was encountered by the remote store.",
            ErrorCode::InvalidArguments => "Invalid Arguments: the specified request contains bad information.",
            ErrorCode::LimitExceeded => "Limit Exceeded: the request to the server is too large.",
            ErrorCode::ManagedAccountRestricted => "Managed Account Restricted: the request was rejected due to a managed-account restriction.",
            ErrorCode::MissingEntitlement => "Missing Entitlement: the app is missing a required entitlement.",
            ErrorCode::NetworkUnavailable => "Network Unavailable: the internet connection appears to be offline.",
            ErrorCode::NetworkFailure => "Network Failure: the internet connection appears to be offline.",
            ErrorCode::NotAuthenticated => "Not Authenticated: sign in to the remote account to enable syncing.",
            ErrorCode::OperationCancelled => "Operation Cancelled: the operation was explicitly canceled.",
            ErrorCode::PartialFailure => "Partial Failure: some items failed, but the operation succeeded overall.",
            ErrorCode::ParticipantMayNeedVerification => "Participant May Need Verification: you are not a member of the share.",
            ErrorCode::PermissionFailure => "Permission Failure: the account is not permitted to perform this operation.",
            ErrorCode::QuotaExceeded => "Quota Exceeded: saving would exceed your current storage quota.",
            ErrorCode::ReferenceViolation => "Reference Violation: the target of a record's parent or share reference was not found.",
            ErrorCode::RequestRateLimited => "Request Rate Limited: transfers to and from the server are being rate limited at this time.",
            ErrorCode::ServerRecordChanged => "Server Record Changed: the record was rejected because the version on the server is different.",
            ErrorCode::ServerRejectedRequest => "Server Rejected Request",
            ErrorCode::ServerResponseLost => "Server Response Lost",
            ErrorCode::ServiceUnavailable => "Service Unavailable: Please try again.",
            ErrorCode::TooManyParticipants => "Too Many Participants: a share cannot be saved because too many participants are attached to the share.",
            ErrorCode::UnknownItem => "Unknown Item: the specified record does not exist.",
            ErrorCode::UserDeletedZone => "User Deleted Zone: the user has deleted this zone from the settings UI.",
            ErrorCode::ZoneBusy => "Zone Busy: the server is too busy to handle the zone operation.",
            ErrorCode::ZoneNotFound => "Zone Not Found: the specified record zone does not exist on the server.",
            ErrorCode::Unrecognized(_) => "Unhandled Error.",
        };
        format!("{text} Code: {}", self.code())
    }
}

/// A failure reported by the remote store.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("remote error {code:?}: {}", .message.as_deref().unwrap_or("no details"))]
pub struct RemoteError {
    /// Failure code.
    pub code: ErrorCode,
    /// Server-provided detail, if any.
    pub message: Option<String>,
    /// Wait suggested by the server before retrying.
    pub retry_after: Option<Duration>,
    /// Number of per-item failures for a partial failure.
    pub partial_failures: Option<usize>,
}

impl RemoteError {
    /// Creates an error with just a code.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: None,
            retry_after: None,
            partial_failures: None,
        }
    }

    /// Attaches a server-provided message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attaches a suggested retry delay.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Attaches the number of per-item failures.
    pub fn with_partial_failures(mut self, count: usize) -> Self {
        self.partial_failures = Some(count);
        self
    }
}
