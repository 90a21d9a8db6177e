//! The local cache seam and reference caches.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use cloudcache_codec::{Entity, RecordCodec};
use cloudcache_protocol::{FetchResult, PartitionId, QueryNotification, RecordId, RemoteRecord};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Applies remote changes to the local cache.
///
/// Every call is awaited before the next change is delivered. Applying the
/// same change twice must leave the cache as applying it once.
#[async_trait]
pub trait CacheDelegate: Send + Sync + 'static {
    /// A record was created or modified remotely.
    async fn on_record_changed(&self, record: RemoteRecord) -> SyncResult<()>;

    /// A record was deleted remotely.
    async fn on_record_deleted(&self, id: RecordId) -> SyncResult<()>;

    /// A whole partition was deleted remotely.
    async fn on_partition_deleted(&self, partition: PartitionId) -> SyncResult<()>;

    /// A query subscription fired.
    async fn on_remote_query_notification(&self, notification: QueryNotification)
        -> FetchResult;

    /// A partition pass applied every change it fetched.
    async fn on_caching_cycle_complete(&self) -> SyncResult<()>;
}

/// An in-memory cache of raw records for testing.
#[derive(Debug, Default)]
pub struct MemoryCache {
    records: RwLock<BTreeMap<RecordId, RemoteRecord>>,
    deleted_records: RwLock<Vec<RecordId>>,
    deleted_partitions: RwLock<Vec<PartitionId>>,
    queries: RwLock<Vec<QueryNotification>>,
    applied: AtomicU64,
    completed_cycles: AtomicU64,
    fail_on: RwLock<HashSet<RecordId>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes applying the given record fail, simulating a crash mid-batch.
    pub fn fail_on(&self, id: RecordId) {
        self.fail_on.write().insert(id);
    }

    /// Stops injecting failures.
    pub fn clear_failures(&self) {
        self.fail_on.write().clear();
    }

    /// Returns a cached record.
    pub fn get(&self, id: &RecordId) -> Option<RemoteRecord> {
        self.records.read().get(id).cloned()
    }

    /// Returns every cached record, ordered by id.
    pub fn records(&self) -> Vec<RemoteRecord> {
        self.records.read().values().cloned().collect()
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Number of record changes applied, including replays.
    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }

    /// Number of completed caching cycles.
    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles.load(Ordering::SeqCst)
    }

    /// Records deleted so far.
    pub fn deleted_records(&self) -> Vec<RecordId> {
        self.deleted_records.read().clone()
    }

    /// Partitions deleted so far.
    pub fn deleted_partitions(&self) -> Vec<PartitionId> {
        self.deleted_partitions.read().clone()
    }

    /// Query notifications received so far.
    pub fn query_notifications(&self) -> Vec<QueryNotification> {
        self.queries.read().clone()
    }
}

#[async_trait]
impl CacheDelegate for MemoryCache {
    async fn on_record_changed(&self, record: RemoteRecord) -> SyncResult<()> {
        if self.fail_on.read().contains(&record.id) {
            return Err(SyncError::delegate(format!("failed to cache {}", record.id)));
        }
        self.applied.fetch_add(1, Ordering::SeqCst);
        self.records.write().insert(record.id.clone(), record);
        Ok(())
    }

    async fn on_record_deleted(&self, id: RecordId) -> SyncResult<()> {
        self.records.write().remove(&id);
        self.deleted_records.write().push(id);
        Ok(())
    }

    async fn on_partition_deleted(&self, partition: PartitionId) -> SyncResult<()> {
        self.records
            .write()
            .retain(|id, _| id.partition != partition);
        self.deleted_partitions.write().push(partition);
        Ok(())
    }

    async fn on_remote_query_notification(
        &self,
        notification: QueryNotification,
    ) -> FetchResult {
        let result = match &notification.record_id {
            Some(_) => FetchResult::NewData,
            None => FetchResult::NoData,
        };
        self.queries.write().push(notification);
        result
    }

    async fn on_caching_cycle_complete(&self) -> SyncResult<()> {
        self.completed_cycles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A cache of decoded entities of one type.
///
/// Records of other types are ignored. Relationships are resolved only
/// through shadow ids, so entities are stored exactly as decoded.
pub struct EntityCache<E: Entity> {
    codec: RecordCodec,
    entities: RwLock<BTreeMap<RecordId, E>>,
}

impl<E: Entity> EntityCache<E> {
    /// Creates an empty cache decoding with `codec`.
    pub fn new(codec: RecordCodec) -> Self {
        Self {
            codec,
            entities: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }
}

impl<E: Entity + Clone> EntityCache<E> {
    /// Returns a cached entity.
    pub fn get(&self, id: &RecordId) -> Option<E> {
        self.entities.read().get(id).cloned()
    }

    /// Returns every cached entity, ordered by id.
    pub fn entities(&self) -> Vec<E> {
        self.entities.read().values().cloned().collect()
    }
}

#[async_trait]
impl<E: Entity + Send + Sync> CacheDelegate for EntityCache<E> {
    async fn on_record_changed(&self, record: RemoteRecord) -> SyncResult<()> {
        if record.record_type != E::RECORD_TYPE {
            debug!(record_type = %record.record_type, "ignoring record of another type");
            return Ok(());
        }
        // Decoding may cache a downloaded blob on disk.
        let codec = self.codec.clone();
        let (id, entity) = tokio::task::spawn_blocking(move || {
            codec
                .to_local_entity::<E>(&record)
                .map(|entity| (record.id, entity))
        })
        .await
        .map_err(|e| SyncError::Task(e.to_string()))??;
        self.entities.write().insert(id, entity);
        Ok(())
    }

    async fn on_record_deleted(&self, id: RecordId) -> SyncResult<()> {
        self.entities.write().remove(&id);
        Ok(())
    }

    async fn on_partition_deleted(&self, partition: PartitionId) -> SyncResult<()> {
        self.entities
            .write()
            .retain(|id, _| id.partition != partition);
        Ok(())
    }

    async fn on_remote_query_notification(
        &self,
        _notification: QueryNotification,
    ) -> FetchResult {
        FetchResult::NoData
    }

    async fn on_caching_cycle_complete(&self) -> SyncResult<()> {
        Ok(())
    }
}
