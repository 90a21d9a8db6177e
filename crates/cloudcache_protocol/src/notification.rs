//! Decoded push notifications and the background-fetch result contract.

use crate::cursor::{DatabaseScope, SubscriptionId};
use crate::record::{FieldValue, PartitionId, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Why a query subscription fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryReason {
    /// A matching record was created.
    RecordCreated,
    /// A matching record was updated.
    RecordUpdated,
    /// A matching record was deleted.
    RecordDeleted,
}

/// A notification about one record matching a query subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryNotification {
    /// Subscription that fired.
    pub subscription_id: SubscriptionId,
    /// Record the notification is about.
    pub record_id: Option<RecordId>,
    /// What happened to the record.
    pub reason: QueryReason,
    /// Desired fields delivered with the notification.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

/// A remote-change notification, already decoded from its push payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteNotification {
    /// Something changed somewhere in a database.
    Database {
        /// Database that changed.
        scope: DatabaseScope,
    },
    /// A record matching a query subscription changed.
    Query(QueryNotification),
    /// Something changed in one partition.
    RecordZone {
        /// Partition that changed.
        partition: PartitionId,
    },
    /// Notifications were marked as read elsewhere.
    ReadNotification,
}

/// Outcome reported to the platform's background-fetch contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchResult {
    /// New data was applied.
    NewData,
    /// Nothing changed.
    NoData,
    /// The cycle failed.
    Failed,
}

impl FetchResult {
    /// Combines the results of several passes: any failure wins, then any new data.
    pub fn merge(self, other: FetchResult) -> FetchResult {
        match (self, other) {
            (FetchResult::Failed, _) | (_, FetchResult::Failed) => FetchResult::Failed,
            (FetchResult::NewData, _) | (_, FetchResult::NewData) => FetchResult::NewData,
            _ => FetchResult::NoData,
        }
    }
}
