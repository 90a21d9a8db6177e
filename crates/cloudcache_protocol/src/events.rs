//! Change pages returned by the remote store and the events feeds emit.

use crate::classify::FailReason;
use crate::cursor::Cursor;
use crate::error::RemoteError;
use crate::record::{PartitionId, RecordId, RemoteRecord};

/// One item of a database-level change page, in server order.
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseChange {
    /// The partition has pending record changes.
    PartitionChanged(PartitionId),
    /// The partition was removed.
    PartitionDeleted(PartitionId),
    /// The server issued an updated database cursor mid-page.
    CursorUpdated(Cursor),
}

/// A page of database-level changes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatabaseChangesPage {
    /// Changes in server order.
    pub changes: Vec<DatabaseChange>,
    /// Cursor covering everything in this page.
    pub cursor: Option<Cursor>,
    /// Whether another page is pending.
    pub more_coming: bool,
}

/// A partition to diff and the cursor to diff it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFetch {
    /// Partition to diff.
    pub partition: PartitionId,
    /// Last known cursor; `None` requests a full diff.
    pub cursor: Option<Cursor>,
}

impl PartitionFetch {
    /// Creates a fetch request.
    pub fn new(partition: PartitionId, cursor: Option<Cursor>) -> Self {
        Self { partition, cursor }
    }
}

/// End of one partition's portion of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionCompletion {
    /// Partition that finished.
    pub partition: PartitionId,
    /// Cursor covering everything delivered for the partition.
    pub cursor: Option<Cursor>,
    /// Whether the partition has more changes pending.
    pub more_coming: bool,
    /// Failure specific to this partition.
    pub error: Option<RemoteError>,
}

impl PartitionCompletion {
    /// A successful completion.
    pub fn finished(partition: PartitionId, cursor: Option<Cursor>, more_coming: bool) -> Self {
        Self {
            partition,
            cursor,
            more_coming,
            error: None,
        }
    }

    /// A failed completion.
    pub fn failed(partition: PartitionId, error: RemoteError) -> Self {
        Self {
            partition,
            cursor: None,
            more_coming: false,
            error: Some(error),
        }
    }
}

/// One item of a partition-level change batch, in server order.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionChange {
    /// A record was created or modified.
    RecordChanged(RemoteRecord),
    /// A record was deleted.
    RecordDeleted(RecordId),
    /// The server issued an updated cursor for a partition mid-batch.
    CursorUpdated {
        /// Partition the cursor belongs to.
        partition: PartitionId,
        /// The new cursor.
        cursor: Cursor,
    },
    /// A partition's portion of the batch ended.
    PartitionFinished(PartitionCompletion),
}

/// A batch of partition-level changes across several partitions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartitionChangesBatch {
    /// Changes in server order.
    pub changes: Vec<PartitionChange>,
}

/// Events emitted by a database change feed.
///
/// A feed emits zero or more non-terminal events followed by exactly one
/// `Completed` or `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseEvent {
    /// A partition has pending record changes.
    PartitionChanged(PartitionId),
    /// A partition was removed.
    PartitionDeleted(PartitionId),
    /// The database cursor advanced.
    CursorAdvanced(Cursor),
    /// The database cursor expired and was cleared.
    CursorReset,
    /// All pages were fetched.
    Completed,
    /// The feed gave up.
    Failed(FailReason),
}

impl DatabaseEvent {
    /// Returns true for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DatabaseEvent::Completed | DatabaseEvent::Failed(_))
    }
}

/// Events emitted by a partition change feed.
///
/// Same terminal contract as `DatabaseEvent`.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionEvent {
    /// A record was created or modified.
    RecordChanged(RemoteRecord),
    /// A record was deleted.
    RecordDeleted(RecordId),
    /// A partition's cursor advanced.
    CursorAdvanced(PartitionId, Cursor),
    /// A partition's cursor expired and was cleared.
    CursorReset(PartitionId),
    /// Every requested partition was exhausted.
    Completed,
    /// The feed gave up.
    Failed(FailReason),
}

impl PartitionEvent {
    /// Returns true for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PartitionEvent::Completed | PartitionEvent::Failed(_))
    }
}
