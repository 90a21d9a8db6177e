//! Durable storage of cursors and subscription ids.

use crate::error::SyncResult;
use cloudcache_protocol::{Cursor, CursorScope, DatabaseScope, SubscriptionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Durable key-value storage for sync bookkeeping.
///
/// Writes must be durable when they return: a cursor is written only after
/// the changes it covers were applied, so losing the write re-fetches those
/// changes, while persisting it early would skip them.
pub trait LocalStore: Send + Sync + 'static {
    /// Reads a cursor.
    fn get_cursor(&self, scope: &CursorScope) -> SyncResult<Option<Cursor>>;

    /// Writes a cursor; `None` clears it.
    fn set_cursor(&self, scope: &CursorScope, cursor: Option<Cursor>) -> SyncResult<()>;

    /// Reads the subscription id of a database.
    fn get_subscription_id(&self, scope: DatabaseScope) -> SyncResult<Option<SubscriptionId>>;

    /// Writes the subscription id of a database.
    fn set_subscription_id(&self, scope: DatabaseScope, id: SubscriptionId) -> SyncResult<()>;
}

impl<T: LocalStore> LocalStore for Arc<T> {
    fn get_cursor(&self, scope: &CursorScope) -> SyncResult<Option<Cursor>> {
        (**self).get_cursor(scope)
    }

    fn set_cursor(&self, scope: &CursorScope, cursor: Option<Cursor>) -> SyncResult<()> {
        (**self).set_cursor(scope, cursor)
    }

    fn get_subscription_id(&self, scope: DatabaseScope) -> SyncResult<Option<SubscriptionId>> {
        (**self).get_subscription_id(scope)
    }

    fn set_subscription_id(&self, scope: DatabaseScope, id: SubscriptionId) -> SyncResult<()> {
        (**self).set_subscription_id(scope, id)
    }
}

/// An in-memory local store for testing.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    cursors: RwLock<HashMap<CursorScope, Cursor>>,
    subscriptions: RwLock<HashMap<DatabaseScope, SubscriptionId>>,
    cursor_writes: RwLock<Vec<(CursorScope, Option<Cursor>)>>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every cursor write, in order.
    pub fn cursor_writes(&self) -> Vec<(CursorScope, Option<Cursor>)> {
        self.cursor_writes.read().clone()
    }

    /// Number of stored cursors.
    pub fn cursor_count(&self) -> usize {
        self.cursors.read().len()
    }
}

impl LocalStore for MemoryLocalStore {
    fn get_cursor(&self, scope: &CursorScope) -> SyncResult<Option<Cursor>> {
        Ok(self.cursors.read().get(scope).cloned())
    }

    fn set_cursor(&self, scope: &CursorScope, cursor: Option<Cursor>) -> SyncResult<()> {
        {
            let mut cursors = self.cursors.write();
            match &cursor {
                Some(cursor) => {
                    cursors.insert(scope.clone(), cursor.clone());
                }
                None => {
                    cursors.remove(scope);
                }
            }
        }
        self.cursor_writes.write().push((scope.clone(), cursor));
        Ok(())
    }

    fn get_subscription_id(&self, scope: DatabaseScope) -> SyncResult<Option<SubscriptionId>> {
        Ok(self.subscriptions.read().get(&scope).cloned())
    }

    fn set_subscription_id(&self, scope: DatabaseScope, id: SubscriptionId) -> SyncResult<()> {
        self.subscriptions.write().insert(scope, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudcache_protocol::PartitionId;

    #[test]
    fn cursor_set_get_clear() {
        let store = MemoryLocalStore::new();
        let scope = CursorScope::Partition(PartitionId::new("inbox"));

        assert_eq!(store.get_cursor(&scope).unwrap(), None);
        store
            .set_cursor(&scope, Some(Cursor::from_bytes(vec![1])))
            .unwrap();
        assert_eq!(
            store.get_cursor(&scope).unwrap(),
            Some(Cursor::from_bytes(vec![1]))
        );
        store.set_cursor(&scope, None).unwrap();
        assert_eq!(store.get_cursor(&scope).unwrap(), None);
        assert_eq!(store.cursor_writes().len(), 2);
    }

    #[test]
    fn subscriptions_are_per_scope() {
        let store = MemoryLocalStore::new();
        store
            .set_subscription_id(DatabaseScope::Private, SubscriptionId::new("p"))
            .unwrap();
        assert_eq!(
            store.get_subscription_id(DatabaseScope::Private).unwrap(),
            Some(SubscriptionId::new("p"))
        );
        assert_eq!(store.get_subscription_id(DatabaseScope::Shared).unwrap(), None);
    }

    #[test]
    fn shared_handle_sees_writes() {
        let store = Arc::new(MemoryLocalStore::new());
        let handle = Arc::clone(&store);
        let scope = CursorScope::Database(DatabaseScope::Private);
        handle
            .set_cursor(&scope, Some(Cursor::from_bytes(vec![7])))
            .unwrap();
        assert_eq!(store.cursor_count(), 1);
    }
}
