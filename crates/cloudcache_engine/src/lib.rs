//! # CloudCache Engine
//!
//! Change feeds and the sync coordinator for CloudCache.
//!
//! This crate provides:
//! - `DatabaseChangeFeed` and `PartitionChangeFeed`, paging change feeds
//!   with retry, cursor reset and chunking built in
//! - `SyncCoordinator`, which bootstraps the cache and turns remote
//!   notifications into feed passes
//! - The `RemoteStore`, `LocalStore` and `CacheDelegate` seams, with
//!   in-memory implementations for testing
//!
//! ## Architecture
//!
//! A notification triggers a **database pass** that collects changed
//! partitions, then a single **partition pass** that fetches their records:
//! 1. The database feed reports partition changes and deletions
//! 2. The partition feed streams record changes per partition
//! 3. The delegate applies each change before the next one is delivered
//! 4. Cursors are persisted after the changes they cover
//!
//! ## Key Invariants
//!
//! - A cursor never runs ahead of the applied changes
//! - Replaying a change is harmless
//! - Feeds emit exactly one terminal event
//! - At most one partition pass runs at a time

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod delegate;
mod error;
mod feed;
mod memory;
mod remote;
mod store;

pub use config::{RetryConfig, SyncConfig};
pub use coordinator::{SyncCoordinator, SyncState, SyncStats};
pub use delegate::{CacheDelegate, EntityCache, MemoryCache};
pub use error::{SyncError, SyncResult};
pub use feed::{DatabaseChangeFeed, FeedState, FeedStream, PartitionChangeFeed};
pub use memory::{sequence_cursor, DatabaseRequest, MemoryRemoteStore, PartitionRequest, RemoteOp};
pub use remote::RemoteStore;
pub use store::{LocalStore, MemoryLocalStore};
