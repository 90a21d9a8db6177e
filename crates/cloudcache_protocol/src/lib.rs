//! # CloudCache Protocol
//!
//! Data types shared by every CloudCache crate.
//!
//! This crate provides:
//! - `Cursor` and `CursorScope` for incremental change fetching
//! - `PartitionId`, `RecordId`, `FieldValue` and `RemoteRecord`
//! - `SystemMetadata`, the opaque server-side versioning blob (canonical CBOR)
//! - `RemoteError` and the error classifier (`classify`)
//! - Change-feed pages, feed events and remote notifications
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod classify;
mod cursor;
mod error;
mod events;
mod notification;
mod record;

pub use classify::{classify, FailReason, ResultType};
pub use cursor::{Cursor, CursorScope, DatabaseScope, OperationId, SubscriptionId};
pub use error::{ErrorCode, ProtocolError, ProtocolResult, RemoteError};
pub use events::{
    DatabaseChange, DatabaseChangesPage, DatabaseEvent, PartitionChange, PartitionChangesBatch,
    PartitionCompletion, PartitionEvent, PartitionFetch,
};
pub use notification::{FetchResult, QueryNotification, QueryReason, RemoteNotification};
pub use record::{
    Asset, FieldValue, Location, PartitionId, RecordId, RemoteRecord, SystemFields,
    SystemMetadata,
};
