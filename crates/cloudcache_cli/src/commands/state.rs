//! A `LocalStore` kept in a JSON file.

use cloudcache_engine::{LocalStore, SyncError, SyncResult};
use cloudcache_protocol::{Cursor, CursorScope, DatabaseScope, SubscriptionId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk layout, keyed by the storage keys of each cursor and subscription.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// Cursor bytes by storage key.
    #[serde(default)]
    pub cursors: BTreeMap<String, Vec<u8>>,
    /// Subscription ids by storage key.
    #[serde(default)]
    pub subscriptions: BTreeMap<String, String>,
}

/// Cursors and subscription ids persisted as JSON.
///
/// Every write rewrites the whole file through a temporary file and a rename.
/// The in-memory state only changes once the rename succeeded.
pub struct JsonFileStore {
    path: PathBuf,
    app_name: String,
    state: Mutex<StateFile>,
}

impl JsonFileStore {
    /// Opens the store, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>, app_name: &str) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| SyncError::store(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateFile::default(),
            Err(e) => return Err(SyncError::store(format!("{}: {e}", path.display()))),
        };
        Ok(Self {
            path,
            app_name: app_name.to_string(),
            state: Mutex::new(state),
        })
    }

    /// Number of stored cursors.
    pub fn cursor_count(&self) -> usize {
        self.state.lock().cursors.len()
    }

    fn update(&self, change: impl FnOnce(&mut StateFile)) -> SyncResult<()> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        change(&mut next);
        self.persist(&next)?;
        *state = next;
        Ok(())
    }

    fn persist(&self, state: &StateFile) -> SyncResult<()> {
        let json = serde_json::to_vec_pretty(state).map_err(|e| SyncError::store(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|e| SyncError::store(format!("{}: {e}", self.path.display())))
    }
}

impl LocalStore for JsonFileStore {
    fn get_cursor(&self, scope: &CursorScope) -> SyncResult<Option<Cursor>> {
        let key = scope.storage_key(&self.app_name);
        Ok(self
            .state
            .lock()
            .cursors
            .get(&key)
            .map(|bytes| Cursor::from_bytes(bytes.clone())))
    }

    fn set_cursor(&self, scope: &CursorScope, cursor: Option<Cursor>) -> SyncResult<()> {
        let key = scope.storage_key(&self.app_name);
        self.update(|state| match cursor {
            Some(cursor) => {
                state.cursors.insert(key, cursor.into_bytes());
            }
            None => {
                state.cursors.remove(&key);
            }
        })
    }

    fn get_subscription_id(&self, scope: DatabaseScope) -> SyncResult<Option<SubscriptionId>> {
        let key = scope.subscription_key(&self.app_name);
        Ok(self
            .state
            .lock()
            .subscriptions
            .get(&key)
            .map(|id| SubscriptionId::new(id.as_str())))
    }

    fn set_subscription_id(&self, scope: DatabaseScope, id: SubscriptionId) -> SyncResult<()> {
        let key = scope.subscription_key(&self.app_name);
        self.update(|state| {
            state.subscriptions.insert(key, id.as_str().to_string());
        })
    }
}
