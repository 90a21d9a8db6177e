//! The sync coordinator.

use crate::config::SyncConfig;
use crate::delegate::CacheDelegate;
use crate::error::{SyncError, SyncResult};
use crate::feed::{DatabaseChangeFeed, PartitionChangeFeed};
use crate::remote::RemoteStore;
use crate::store::LocalStore;
use cloudcache_codec::AssetStore;
use cloudcache_protocol::{
    Cursor, CursorScope, DatabaseEvent, DatabaseScope, FetchResult, PartitionEvent,
    PartitionFetch, PartitionId, RecordId, RemoteNotification, RemoteRecord, SubscriptionId,
};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The current state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Nothing has run yet.
    Idle,
    /// Creating partitions, subscriptions and resuming operations.
    Bootstrapping,
    /// Fetching partition-level changes of a database.
    FetchingDatabase,
    /// Fetching record changes of partitions.
    FetchingPartitions,
    /// The last pass completed.
    Synced,
    /// The last pass failed.
    Failed,
}

impl SyncState {
    /// Returns true while a pass is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Bootstrapping | SyncState::FetchingDatabase | SyncState::FetchingPartitions
        )
    }
}

/// Statistics about sync passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Partition passes that applied every change they fetched.
    pub cycles_completed: u64,
    /// Record changes handed to the delegate.
    pub records_changed: u64,
    /// Record deletions handed to the delegate.
    pub records_deleted: u64,
    /// Partition deletions handed to the delegate.
    pub partitions_deleted: u64,
    /// Passes that ended in failure.
    pub failures: u64,
    /// Last successful pass.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Drives change feeds and applies their events to the local cache.
///
/// Cursors are persisted only after the changes they cover were applied, so
/// an interrupted pass re-fetches rather than skips. Passes are serialized:
/// at most one partition feed runs at a time and concurrent triggers wait.
pub struct SyncCoordinator<R: RemoteStore, L: LocalStore, D: CacheDelegate> {
    config: SyncConfig,
    remote: Arc<R>,
    local: Arc<L>,
    delegate: Arc<D>,
    assets: RwLock<HashMap<String, AssetStore>>,
    resumed: Mutex<Vec<JoinHandle<()>>>,
    cycle: tokio::sync::Mutex<()>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl<R: RemoteStore, L: LocalStore, D: CacheDelegate> SyncCoordinator<R, L, D> {
    /// Creates a new coordinator.
    pub fn new(config: SyncConfig, remote: R, local: L, delegate: D) -> Self {
        Self {
            config,
            remote: Arc::new(remote),
            local: Arc::new(local),
            delegate: Arc::new(delegate),
            assets: RwLock::new(HashMap::new()),
            resumed: Mutex::new(Vec::new()),
            cycle: tokio::sync::Mutex::new(()),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Registers the blob cache of a record type for garbage collection.
    pub fn with_asset_store(self, store: AssetStore) -> Self {
        self.assets
            .write()
            .insert(store.record_type().to_string(), store);
        self
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the remote store.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Gets the local store.
    pub fn local(&self) -> &L {
        &self.local
    }

    /// Gets the cache delegate.
    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Bootstraps the cache at process start.
    ///
    /// Creates the configured partitions, registers one push subscription
    /// per database, resumes pending operations and then fetches the changes
    /// of every configured database. Bootstrap failures are logged and do not
    /// prevent the fetch.
    pub async fn on_launch(&self) -> FetchResult {
        info!(app = %self.config.app_name, "bootstrapping cache");
        self.set_state(SyncState::Bootstrapping);

        if !self.config.partitions.is_empty() {
            if let Err(error) = self
                .remote
                .create_partitions_if_absent(&self.config.partitions)
                .await
            {
                warn!(%error, "could not create partitions");
            }
        }

        for &scope in &self.config.scopes {
            if let Err(error) = self.ensure_subscription(scope).await {
                warn!(%scope, %error, "could not register push subscription");
            }
        }

        if let Err(error) = self.resume_pending_operations().await {
            warn!(%error, "could not list pending operations");
        }

        let mut result = FetchResult::NoData;
        for &scope in &self.config.scopes {
            result = result.merge(self.fetch_database_changes(scope).await);
        }
        result
    }

    /// Handles a remote-change notification.
    pub async fn on_remote_notification(&self, notification: RemoteNotification) -> FetchResult {
        match notification {
            RemoteNotification::Database { scope } => self.fetch_database_changes(scope).await,
            RemoteNotification::Query(query) => {
                debug!(subscription = %query.subscription_id, "query notification");
                self.delegate.on_remote_query_notification(query).await
            }
            RemoteNotification::RecordZone { partition } => {
                self.fetch_partition_changes(vec![partition]).await
            }
            RemoteNotification::ReadNotification => FetchResult::NoData,
        }
    }

    /// Returns the push subscription of a database, creating it if needed.
    ///
    /// A subscription id already in the local store is trusted as is.
    pub async fn ensure_subscription(&self, scope: DatabaseScope) -> SyncResult<SubscriptionId> {
        if let Some(existing) = self.local.get_subscription_id(scope)? {
            debug!(%scope, subscription = %existing, "subscription already registered");
            return Ok(existing);
        }
        let id = self.remote.create_or_get_push_subscription(scope).await?;
        self.local.set_subscription_id(scope, id.clone())?;
        info!(%scope, subscription = %id, "push subscription registered");
        Ok(id)
    }

    /// Re-attaches completion handling to every pending remote operation.
    ///
    /// Each operation is resumed in its own task. Returns how many were found.
    pub async fn resume_pending_operations(&self) -> SyncResult<usize> {
        let operations = self.remote.list_pending_operations().await?;
        let count = operations.len();
        let mut resumed = self.resumed.lock();
        for id in operations {
            let remote = Arc::clone(&self.remote);
            resumed.push(tokio::spawn(async move {
                match remote.resume_operation(&id).await {
                    Ok(()) => info!(operation = %id, "pending operation completed"),
                    Err(error) => warn!(operation = %id, %error, "pending operation failed"),
                }
            }));
        }
        if count > 0 {
            info!(count, "resumed pending operations");
        }
        Ok(count)
    }

    /// Waits for every resumed operation to finish.
    pub async fn join_resumed_operations(&self) {
        let handles: Vec<JoinHandle<()>> = self.resumed.lock().drain(..).collect();
        for handle in handles {
            if let Err(error) = handle.await {
                warn!(%error, "resume task ended abnormally");
            }
        }
    }

    /// Runs one database pass, followed by one partition pass over every
    /// partition it reported as changed.
    pub async fn fetch_database_changes(&self, scope: DatabaseScope) -> FetchResult {
        let outcome = self.database_pass(scope).await;
        self.settle(outcome)
    }

    /// Runs one partition pass over the given partitions.
    pub async fn fetch_partition_changes(&self, partitions: Vec<PartitionId>) -> FetchResult {
        let outcome = {
            let _cycle = self.cycle.lock().await;
            self.partition_pass(partitions).await
        };
        self.settle(outcome)
    }

    fn settle(&self, outcome: SyncResult<FetchResult>) -> FetchResult {
        match outcome {
            Ok(result) => {
                self.set_state(SyncState::Synced);
                self.stats.write().last_sync_time = Some(Instant::now());
                result
            }
            Err(error) => {
                error!(%error, "sync pass failed");
                self.set_state(SyncState::Failed);
                let mut stats = self.stats.write();
                stats.failures += 1;
                stats.last_error = Some(error.to_string());
                FetchResult::Failed
            }
        }
    }

    async fn database_pass(&self, scope: DatabaseScope) -> SyncResult<FetchResult> {
        let _cycle = self.cycle.lock().await;
        self.set_state(SyncState::FetchingDatabase);

        let key = CursorScope::Database(scope);
        let cursor = self.local.get_cursor(&key)?;
        let mut feed = DatabaseChangeFeed::new(Arc::clone(&self.remote), scope, cursor)
            .with_limit(self.config.database_page_limit)
            .with_retry(self.config.retry.clone())
            .start();

        let mut pending: Vec<PartitionId> = Vec::new();
        let mut next_cursor: Option<Cursor> = None;
        let mut deleted = 0u64;
        loop {
            let Some(event) = feed.next().await else {
                return Err(SyncError::Task(
                    "database feed ended without a terminal event".into(),
                ));
            };
            match event {
                DatabaseEvent::PartitionChanged(partition) => {
                    if !pending.contains(&partition) {
                        pending.push(partition);
                    }
                }
                DatabaseEvent::PartitionDeleted(partition) => {
                    debug!(%partition, "partition deleted remotely");
                    self.delegate.on_partition_deleted(partition.clone()).await?;
                    self.local
                        .set_cursor(&CursorScope::Partition(partition.clone()), None)?;
                    pending.retain(|p| p != &partition);
                    deleted += 1;
                    self.stats.write().partitions_deleted += 1;
                }
                DatabaseEvent::CursorAdvanced(cursor) => next_cursor = Some(cursor),
                DatabaseEvent::CursorReset => {
                    self.local.set_cursor(&key, None)?;
                    next_cursor = None;
                }
                DatabaseEvent::Completed => break,
                DatabaseEvent::Failed(reason) => return Err(reason.into()),
            }
        }
        drop(feed);

        let result = if pending.is_empty() {
            debug!(%scope, "no partition changes");
            if deleted > 0 {
                FetchResult::NewData
            } else {
                FetchResult::NoData
            }
        } else {
            info!(%scope, partitions = pending.len(), "partitions changed");
            self.partition_pass(pending).await?
        };

        if let Some(cursor) = next_cursor {
            self.local.set_cursor(&key, Some(cursor))?;
        }
        Ok(result)
    }

    /// Must be called with the cycle guard held.
    async fn partition_pass(&self, partitions: Vec<PartitionId>) -> SyncResult<FetchResult> {
        self.set_state(SyncState::FetchingPartitions);

        let mut requests = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let cursor = self
                .local
                .get_cursor(&CursorScope::Partition(partition.clone()))?;
            requests.push(PartitionFetch::new(partition, cursor));
        }

        let mut feed = PartitionChangeFeed::new(Arc::clone(&self.remote), requests)
            .with_limit(self.config.partition_page_limit)
            .with_retry(self.config.retry.clone())
            .start();

        loop {
            let Some(event) = feed.next().await else {
                return Err(SyncError::Task(
                    "partition feed ended without a terminal event".into(),
                ));
            };
            match event {
                PartitionEvent::RecordChanged(record) => {
                    debug!(record = %record.id, "record changed");
                    self.delegate.on_record_changed(record.clone()).await?;
                    self.stats.write().records_changed += 1;
                    self.reconcile_assets(record).await;
                }
                PartitionEvent::RecordDeleted(id) => {
                    debug!(record = %id, "record deleted");
                    self.delegate.on_record_deleted(id.clone()).await?;
                    self.stats.write().records_deleted += 1;
                    self.purge_assets(id).await;
                }
                PartitionEvent::CursorAdvanced(partition, cursor) => {
                    self.local
                        .set_cursor(&CursorScope::Partition(partition), Some(cursor))?;
                }
                PartitionEvent::CursorReset(partition) => {
                    self.local
                        .set_cursor(&CursorScope::Partition(partition), None)?;
                }
                PartitionEvent::Completed => {
                    self.delegate.on_caching_cycle_complete().await?;
                    self.stats.write().cycles_completed += 1;
                    info!("caching cycle complete");
                    return Ok(FetchResult::NewData);
                }
                PartitionEvent::Failed(reason) => return Err(reason.into()),
            }
        }
    }

    /// Deletes local blobs of `record` that it no longer references.
    ///
    /// Blobs are a cache: a failure here is logged and the pass goes on.
    async fn reconcile_assets(&self, record: RemoteRecord) {
        let store = self.assets.read().get(&record.record_type).cloned();
        let Some(store) = store else {
            return;
        };
        match tokio::task::spawn_blocking(move || store.reconcile(&record)).await {
            Ok(Ok(deleted)) if !deleted.is_empty() => {
                debug!(count = deleted.len(), "stale blobs deleted");
            }
            Ok(Ok(_)) => {}
            Ok(Err(error)) => warn!(%error, "blob reconciliation failed"),
            Err(error) => warn!(%error, "blob reconciliation task failed"),
        }
    }

    /// Deletes every local blob of a deleted record.
    async fn purge_assets(&self, id: RecordId) {
        let stores: Vec<AssetStore> = self.assets.read().values().cloned().collect();
        if stores.is_empty() {
            return;
        }
        let purge = tokio::task::spawn_blocking(move || {
            let mut deleted = 0;
            for store in &stores {
                match store.delete_all(&id.name) {
                    Ok(names) => deleted += names.len(),
                    Err(error) => warn!(record = %id, %error, "blob purge failed"),
                }
            }
            deleted
        });
        match purge.await {
            Ok(0) => {}
            Ok(count) => debug!(count, "blobs of deleted record purged"),
            Err(error) => warn!(%error, "blob purge task failed"),
        }
    }
}
