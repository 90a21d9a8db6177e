//! The remote record store seam.

use async_trait::async_trait;
use cloudcache_protocol::{
    Cursor, DatabaseChangesPage, DatabaseScope, OperationId, PartitionChangesBatch,
    PartitionFetch, PartitionId, RemoteError, SubscriptionId,
};

/// A remote, partitioned record store.
///
/// This trait abstracts the service, allowing for different implementations
/// (a real service client, the in-memory `MemoryRemoteStore` for testing).
/// Every failure is a `RemoteError` so it can be classified.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Creates the given partitions, leaving existing ones untouched.
    async fn create_partitions_if_absent(
        &self,
        partitions: &[PartitionId],
    ) -> Result<(), RemoteError>;

    /// Returns the database's change subscription, creating it if needed.
    async fn create_or_get_push_subscription(
        &self,
        scope: DatabaseScope,
    ) -> Result<SubscriptionId, RemoteError>;

    /// Fetches one page of partition-level changes since `cursor`.
    async fn fetch_database_changes(
        &self,
        scope: DatabaseScope,
        cursor: Option<&Cursor>,
        limit: u32,
    ) -> Result<DatabaseChangesPage, RemoteError>;

    /// Fetches one batch of record changes for several partitions.
    ///
    /// The batch ends each requested partition's portion with a
    /// `PartitionFinished` item carrying its cursor, `more_coming` flag, or
    /// partition-specific error.
    async fn fetch_partition_changes(
        &self,
        requests: &[PartitionFetch],
        limit: u32,
    ) -> Result<PartitionChangesBatch, RemoteError>;

    /// Lists long-running operations that have not reported completion.
    async fn list_pending_operations(&self) -> Result<Vec<OperationId>, RemoteError>;

    /// Waits for a pending operation to complete.
    async fn resume_operation(&self, id: &OperationId) -> Result<(), RemoteError>;
}
