//! An in-memory remote store.
//!
//! Every mutation gets a global sequence number. A cursor is the big-endian
//! encoding of the last sequence number it covers, so cursors are totally
//! ordered and cheap to expire.

use crate::remote::RemoteStore;
use async_trait::async_trait;
use cloudcache_protocol::{
    Cursor, DatabaseChange, DatabaseChangesPage, DatabaseScope, ErrorCode, OperationId,
    PartitionChange, PartitionChangesBatch, PartitionCompletion, PartitionFetch, PartitionId,
    RecordId, RemoteError, RemoteRecord, SubscriptionId, SystemMetadata,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

/// Remote operations that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    /// `create_partitions_if_absent`.
    CreatePartitions,
    /// `create_or_get_push_subscription`.
    CreateSubscription,
    /// `fetch_database_changes`.
    FetchDatabaseChanges,
    /// `fetch_partition_changes`.
    FetchPartitionChanges,
    /// `list_pending_operations`.
    ListPendingOperations,
    /// `resume_operation`.
    ResumeOperation,
}

#[derive(Debug, Clone)]
enum RecordEntry {
    Saved(RemoteRecord),
    Deleted(RecordId),
}

#[derive(Debug)]
struct PartitionLog {
    scope: DatabaseScope,
    entries: Vec<(u64, RecordEntry)>,
    expired_before: u64,
}

#[derive(Debug, Clone)]
enum DatabaseEntry {
    Changed(PartitionId),
    Deleted(PartitionId),
}

/// A logged `fetch_database_changes` call.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseRequest {
    /// Requested database.
    pub scope: DatabaseScope,
    /// Cursor sent.
    pub cursor: Option<Cursor>,
    /// Page size sent.
    pub limit: u32,
}

/// A logged `fetch_partition_changes` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionRequest {
    /// Partitions and cursors sent.
    pub fetches: Vec<PartitionFetch>,
    /// Page size sent.
    pub limit: u32,
}

#[derive(Debug, Default)]
struct Inner {
    sequence: u64,
    partitions: BTreeMap<PartitionId, PartitionLog>,
    database_log: Vec<(u64, DatabaseScope, DatabaseEntry)>,
    database_expired_before: HashMap<DatabaseScope, u64>,
    subscriptions: HashMap<DatabaseScope, SubscriptionId>,
    subscription_creates: usize,
    pending_operations: Vec<OperationId>,
    resumed_operations: Vec<OperationId>,
    failures: HashMap<RemoteOp, VecDeque<RemoteError>>,
    partition_failures: HashMap<PartitionId, VecDeque<RemoteError>>,
    stalled: BTreeSet<PartitionId>,
    max_page_size: Option<u32>,
    database_requests: Vec<DatabaseRequest>,
    partition_requests: Vec<PartitionRequest>,
}

impl Inner {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn take_failure(&mut self, op: RemoteOp) -> Result<(), RemoteError> {
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn ensure_partition(&mut self, scope: DatabaseScope, partition: &PartitionId) {
        if self.partitions.contains_key(partition) {
            return;
        }
        self.partitions.insert(
            partition.clone(),
            PartitionLog {
                scope,
                entries: Vec::new(),
                expired_before: 0,
            },
        );
        let seq = self.next_sequence();
        self.database_log
            .push((seq, scope, DatabaseEntry::Changed(partition.clone())));
    }

    fn append(&mut self, partition: &PartitionId, entry: RecordEntry) {
        let seq = self.next_sequence();
        let scope = match self.partitions.get_mut(partition) {
            Some(log) => {
                log.entries.push((seq, entry));
                log.scope
            }
            None => return,
        };
        self.database_log
            .push((seq, scope, DatabaseEntry::Changed(partition.clone())));
    }

    fn oversized(&self, limit: u32) -> bool {
        self.max_page_size.is_some_and(|max| limit > max)
    }
}

/// A complete in-memory `RemoteStore` for tests and demos.
///
/// Supports paging, cursor expiry, scripted failures and a request log.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    inner: Mutex<Inner>,
}

impl MemoryRemoteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a partition in the given database.
    pub fn add_partition(&self, scope: DatabaseScope, partition: impl Into<PartitionId>) {
        self.inner.lock().ensure_partition(scope, &partition.into());
    }

    /// Saves a record, creating its partition in the private database if needed.
    ///
    /// Returns the record as stored, with a server change tag.
    pub fn save_record(&self, mut record: RemoteRecord) -> Result<RemoteRecord, RemoteError> {
        let mut inner = self.inner.lock();
        let partition = record.id.partition.clone();
        inner.ensure_partition(DatabaseScope::Private, &partition);

        let mut fields = record.metadata.fields().map_err(|e| {
            RemoteError::new(ErrorCode::InvalidArguments).with_message(e.to_string())
        })?;
        fields.change_tag = Some(format!("{:x}", inner.sequence + 1));
        fields.modified_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|d| i64::try_from(d.as_millis()).ok());
        record.metadata = SystemMetadata::from_fields(&fields).map_err(|e| {
            RemoteError::new(ErrorCode::InternalError).with_message(e.to_string())
        })?;

        inner.append(&partition, RecordEntry::Saved(record.clone()));
        Ok(record)
    }

    /// Deletes a record.
    pub fn delete_record(&self, id: &RecordId) {
        let mut inner = self.inner.lock();
        inner.append(&id.partition, RecordEntry::Deleted(id.clone()));
    }

    /// Deletes a whole partition.
    pub fn delete_partition(&self, partition: &PartitionId) {
        let mut inner = self.inner.lock();
        if let Some(log) = inner.partitions.remove(partition) {
            let seq = inner.next_sequence();
            inner
                .database_log
                .push((seq, log.scope, DatabaseEntry::Deleted(partition.clone())));
        }
    }

    /// Expires every cursor of `partition` issued so far.
    pub fn expire_partition_cursors(&self, partition: &PartitionId) {
        let mut inner = self.inner.lock();
        let now = inner.sequence + 1;
        if let Some(log) = inner.partitions.get_mut(partition) {
            log.expired_before = now;
        }
    }

    /// Expires every database cursor of `scope` issued so far.
    pub fn expire_database_cursors(&self, scope: DatabaseScope) {
        let mut inner = self.inner.lock();
        let now = inner.sequence + 1;
        inner.database_expired_before.insert(scope, now);
    }

    /// Makes the next call of `op` fail with `error`. Failures queue up.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.inner
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Makes the next batch touching `partition` report `error` for it.
    pub fn fail_partition_next(&self, partition: impl Into<PartitionId>, error: RemoteError) {
        self.inner
            .lock()
            .partition_failures
            .entry(partition.into())
            .or_default()
            .push_back(error);
    }

    /// Makes `partition` answer every fetch with `more_coming` and the cursor
    /// it was asked with, until resumed with `stalled = false`.
    pub fn stall_partition(&self, partition: impl Into<PartitionId>, stalled: bool) {
        let mut inner = self.inner.lock();
        if stalled {
            inner.stalled.insert(partition.into());
        } else {
            inner.stalled.remove(&partition.into());
        }
    }

    /// Rejects requests with a page size above `max` as too large.
    pub fn set_max_page_size(&self, max: Option<u32>) {
        self.inner.lock().max_page_size = max;
    }

    /// Registers a long-running operation.
    pub fn add_pending_operation(&self, id: OperationId) {
        self.inner.lock().pending_operations.push(id);
    }

    /// Operations resumed so far.
    pub fn resumed_operations(&self) -> Vec<OperationId> {
        self.inner.lock().resumed_operations.clone()
    }

    /// Number of subscriptions actually created.
    pub fn subscription_creates(&self) -> usize {
        self.inner.lock().subscription_creates
    }

    /// Existing partitions.
    pub fn partitions(&self) -> Vec<PartitionId> {
        self.inner.lock().partitions.keys().cloned().collect()
    }

    /// Every `fetch_database_changes` call so far.
    pub fn database_requests(&self) -> Vec<DatabaseRequest> {
        self.inner.lock().database_requests.clone()
    }

    /// Every `fetch_partition_changes` call so far.
    pub fn partition_requests(&self) -> Vec<PartitionRequest> {
        self.inner.lock().partition_requests.clone()
    }

    /// Forgets logged requests.
    pub fn clear_requests(&self) {
        let mut inner = self.inner.lock();
        inner.database_requests.clear();
        inner.partition_requests.clear();
    }
}

/// Encodes a sequence number as a cursor.
pub fn sequence_cursor(sequence: u64) -> Cursor {
    Cursor::from_bytes(sequence.to_be_bytes().to_vec())
}

fn cursor_sequence(cursor: &Cursor) -> Option<u64> {
    let bytes: [u8; 8] = cursor.as_bytes().try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn expired(message: &str) -> RemoteError {
    RemoteError::new(ErrorCode::ChangeTokenExpired).with_message(message)
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn create_partitions_if_absent(
        &self,
        partitions: &[PartitionId],
    ) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock();
        inner.take_failure(RemoteOp::CreatePartitions)?;
        for partition in partitions {
            inner.ensure_partition(DatabaseScope::Private, partition);
        }
        Ok(())
    }

    async fn create_or_get_push_subscription(
        &self,
        scope: DatabaseScope,
    ) -> Result<SubscriptionId, RemoteError> {
        let mut inner = self.inner.lock();
        inner.take_failure(RemoteOp::CreateSubscription)?;
        if let Some(existing) = inner.subscriptions.get(&scope) {
            return Ok(existing.clone());
        }
        let id = SubscriptionId::new(format!("{scope}-database-changes"));
        inner.subscriptions.insert(scope, id.clone());
        inner.subscription_creates += 1;
        Ok(id)
    }

    async fn fetch_database_changes(
        &self,
        scope: DatabaseScope,
        cursor: Option<&Cursor>,
        limit: u32,
    ) -> Result<DatabaseChangesPage, RemoteError> {
        let mut inner = self.inner.lock();
        inner.database_requests.push(DatabaseRequest {
            scope,
            cursor: cursor.cloned(),
            limit,
        });
        inner.take_failure(RemoteOp::FetchDatabaseChanges)?;
        if inner.oversized(limit) {
            return Err(RemoteError::new(ErrorCode::LimitExceeded));
        }

        let since = match cursor {
            None => 0,
            Some(cursor) => {
                let since = cursor_sequence(cursor).ok_or_else(|| expired("malformed cursor"))?;
                let floor = inner
                    .database_expired_before
                    .get(&scope)
                    .copied()
                    .unwrap_or(0);
                if since < floor {
                    return Err(expired("database cursor expired"));
                }
                since
            }
        };

        let pending: Vec<&(u64, DatabaseScope, DatabaseEntry)> = inner
            .database_log
            .iter()
            .filter(|(seq, entry_scope, _)| *seq > since && *entry_scope == scope)
            .collect();
        let take = pending.len().min(limit as usize);
        let more_coming = pending.len() > take;
        let last = if take == 0 {
            since.max(inner.sequence)
        } else if more_coming {
            pending[take - 1].0
        } else {
            inner.sequence
        };

        let changes = pending[..take]
            .iter()
            .map(|(_, _, entry)| match entry {
                DatabaseEntry::Changed(p) => DatabaseChange::PartitionChanged(p.clone()),
                DatabaseEntry::Deleted(p) => DatabaseChange::PartitionDeleted(p.clone()),
            })
            .collect();

        Ok(DatabaseChangesPage {
            changes,
            cursor: Some(sequence_cursor(last)),
            more_coming,
        })
    }

    async fn fetch_partition_changes(
        &self,
        requests: &[PartitionFetch],
        limit: u32,
    ) -> Result<PartitionChangesBatch, RemoteError> {
        let mut inner = self.inner.lock();
        inner.partition_requests.push(PartitionRequest {
            fetches: requests.to_vec(),
            limit,
        });
        inner.take_failure(RemoteOp::FetchPartitionChanges)?;
        if inner.oversized(limit) {
            return Err(RemoteError::new(ErrorCode::LimitExceeded));
        }

        let mut changes = Vec::new();
        for fetch in requests {
            let partition = fetch.partition.clone();
            if let Some(error) = inner
                .partition_failures
                .get_mut(&partition)
                .and_then(VecDeque::pop_front)
            {
                changes.push(PartitionChange::PartitionFinished(
                    PartitionCompletion::failed(partition, error),
                ));
                continue;
            }

            let Some(log) = inner.partitions.get(&partition) else {
                changes.push(PartitionChange::PartitionFinished(
                    PartitionCompletion::failed(partition, RemoteError::new(ErrorCode::ZoneNotFound)),
                ));
                continue;
            };

            if inner.stalled.contains(&partition) {
                changes.push(PartitionChange::PartitionFinished(
                    PartitionCompletion::finished(partition, fetch.cursor.clone(), true),
                ));
                continue;
            }

            let since = match &fetch.cursor {
                None => 0,
                Some(cursor) => match cursor_sequence(cursor) {
                    Some(since) if since >= log.expired_before => since,
                    _ => {
                        changes.push(PartitionChange::PartitionFinished(
                            PartitionCompletion::failed(
                                partition,
                                expired("partition cursor expired"),
                            ),
                        ));
                        continue;
                    }
                },
            };

            let pending: Vec<&(u64, RecordEntry)> =
                log.entries.iter().filter(|(seq, _)| *seq > since).collect();
            let take = pending.len().min(limit as usize);
            let more_coming = pending.len() > take;
            let last = if take == 0 {
                since.max(log.entries.last().map(|(seq, _)| *seq).unwrap_or(0))
            } else {
                pending[take - 1].0
            };

            for (_, entry) in &pending[..take] {
                changes.push(match entry {
                    RecordEntry::Saved(record) => PartitionChange::RecordChanged(record.clone()),
                    RecordEntry::Deleted(id) => PartitionChange::RecordDeleted(id.clone()),
                });
            }
            changes.push(PartitionChange::PartitionFinished(
                PartitionCompletion::finished(partition, Some(sequence_cursor(last)), more_coming),
            ));
        }

        Ok(PartitionChangesBatch { changes })
    }

    async fn list_pending_operations(&self) -> Result<Vec<OperationId>, RemoteError> {
        let mut inner = self.inner.lock();
        inner.take_failure(RemoteOp::ListPendingOperations)?;
        Ok(inner.pending_operations.clone())
    }

    async fn resume_operation(&self, id: &OperationId) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock();
        inner.take_failure(RemoteOp::ResumeOperation)?;
        let before = inner.pending_operations.len();
        inner.pending_operations.retain(|pending| pending != id);
        if inner.pending_operations.len() == before {
            return Err(RemoteError::new(ErrorCode::UnknownItem));
        }
        inner.resumed_operations.push(id.clone());
        Ok(())
    }
}
