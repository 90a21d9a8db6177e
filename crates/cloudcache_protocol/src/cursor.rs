//! Cursors, scopes and server-issued identifiers.

use crate::record::PartitionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque, server-issued position marker.
///
/// Cursors are totally ordered by the remote store, never by the client.
/// The client only stores them and hands them back on the next fetch.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(Vec<u8>);

impl Cursor {
    /// Wraps raw cursor bytes received from the remote store.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw cursor bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the cursor, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// The database a change feed or subscription is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseScope {
    /// The user's private database.
    Private,
    /// Records shared with the user by others.
    Shared,
}

impl DatabaseScope {
    /// Local-store key under which this scope's push subscription id is kept.
    pub fn subscription_key(&self, app_name: &str) -> String {
        match self {
            DatabaseScope::Private => format!("{app_name}.privateDatabaseSubscriptionID"),
            DatabaseScope::Shared => format!("{app_name}.sharedDatabaseSubscriptionID"),
        }
    }
}

impl fmt::Display for DatabaseScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseScope::Private => f.write_str("private"),
            DatabaseScope::Shared => f.write_str("shared"),
        }
    }
}

/// What a persisted cursor belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CursorScope {
    /// The partition inventory of a whole database.
    Database(DatabaseScope),
    /// The record changes of a single partition.
    Partition(PartitionId),
}

impl CursorScope {
    /// Local-store key under which this cursor is kept.
    pub fn storage_key(&self, app_name: &str) -> String {
        match self {
            CursorScope::Database(DatabaseScope::Private) => {
                format!("{app_name}.privateDatabaseTokenKey")
            }
            CursorScope::Database(DatabaseScope::Shared) => {
                format!("{app_name}.sharedDatabaseTokenKey")
            }
            CursorScope::Partition(partition) => format!("{app_name}.zoneToken.{partition}"),
        }
    }
}

/// Identifier of a push subscription registered with the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Creates a subscription id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a long-running remote operation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Creates an operation id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_keys_are_scoped_by_app() {
        let key = CursorScope::Database(DatabaseScope::Private).storage_key("Memo");
        assert_eq!(key, "Memo.privateDatabaseTokenKey");

        let key = CursorScope::Partition(PartitionId::new("labels")).storage_key("Memo");
        assert_eq!(key, "Memo.zoneToken.labels");

        assert_eq!(
            DatabaseScope::Shared.subscription_key("Memo"),
            "Memo.sharedDatabaseSubscriptionID"
        );
    }

    #[test]
    fn cursor_debug_is_hex() {
        let cursor = Cursor::from_bytes(vec![0x00, 0xab]);
        assert_eq!(format!("{cursor:?}"), "Cursor(00ab)");
    }
}
