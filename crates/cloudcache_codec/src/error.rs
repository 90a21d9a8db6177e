//! Error types for the codec crate.

use cloudcache_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type for asset store operations.
pub type AssetResult<T> = Result<T, AssetError>;

/// Errors that can occur while converting between entities and records.
///
/// These are data-integrity errors. They are returned synchronously to the
/// caller and never retried.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The entity's descriptor table does not describe a record.
    #[error("entity is not record-like: {reason}")]
    StructuralMismatch {
        /// What is wrong with the shape.
        reason: String,
    },

    /// The entity has no system metadata and initialization was not requested.
    #[error("entity of type {record_type} has no system metadata")]
    MissingMetadata {
        /// Record type of the entity.
        record_type: String,
    },

    /// A referenced entity was never saved remotely.
    #[error("field {field} references an entity that was never saved remotely")]
    UnsavedReference {
        /// Offending field.
        field: String,
    },

    /// A field holds a value the remote store cannot represent.
    #[error("field {field} has unsupported type {kind}")]
    UnsupportedFieldType {
        /// Offending field.
        field: String,
        /// Kind of the rejected value.
        kind: String,
    },

    /// A record was decoded into an entity of another type.
    #[error("record type mismatch: expected {expected}, found {found}")]
    RecordTypeMismatch {
        /// Record type of the target entity.
        expected: String,
        /// Record type of the record.
        found: String,
    },

    /// A record field does not hold the kind the descriptor expects.
    #[error("field {field} expected {expected}, found {found}")]
    FieldTypeMismatch {
        /// Offending field.
        field: String,
        /// Kind the descriptor expects.
        expected: &'static str,
        /// Kind found on the record.
        found: &'static str,
    },

    /// The entity carries no blob or no asset directory is configured.
    #[error("no asset storage available for record type {record_type}")]
    NoAssetStorage {
        /// Record type of the entity.
        record_type: String,
    },

    /// System metadata could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The asset cache failed.
    #[error(transparent)]
    Asset(#[from] AssetError),
}

impl CodecError {
    /// Creates a structural mismatch error.
    pub fn structural(reason: impl Into<String>) -> Self {
        Self::StructuralMismatch {
            reason: reason.into(),
        }
    }

    /// Creates an unsaved reference error.
    pub fn unsaved(field: impl Into<String>) -> Self {
        Self::UnsavedReference {
            field: field.into(),
        }
    }

    /// Creates an unsupported field type error.
    pub fn unsupported(field: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::UnsupportedFieldType {
            field: field.into(),
            kind: kind.into(),
        }
    }

    /// Creates a field type mismatch error.
    pub fn field_mismatch(
        field: impl Into<String>,
        expected: &'static str,
        found: &'static str,
    ) -> Self {
        Self::FieldTypeMismatch {
            field: field.into(),
            expected,
            found,
        }
    }
}

/// Errors raised by the local asset cache.
#[derive(Error, Debug)]
pub enum AssetError {
    /// A filesystem operation failed.
    #[error("asset I/O failed on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A filename or owner id would escape the asset directory.
    #[error("invalid asset name {0:?}")]
    InvalidName(String),
}

impl AssetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
