//! Configuration for the sync engine.

use cloudcache_protocol::{DatabaseScope, PartitionId};

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Application name, prefix of every local-store key.
    pub app_name: String,
    /// Partitions created at bootstrap.
    pub partitions: Vec<PartitionId>,
    /// Databases to subscribe to and fetch from.
    pub scopes: Vec<DatabaseScope>,
    /// Page size for database change fetches.
    pub database_page_limit: u32,
    /// Page size for partition change fetches.
    pub partition_page_limit: u32,
    /// Retry configuration.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            partitions: Vec::new(),
            scopes: vec![DatabaseScope::Private],
            database_page_limit: 100,
            partition_page_limit: 100,
            retry: RetryConfig::default(),
        }
    }

    /// Adds a partition to create at bootstrap.
    pub fn with_partition(mut self, partition: impl Into<PartitionId>) -> Self {
        let partition = partition.into();
        if !self.partitions.contains(&partition) {
            self.partitions.push(partition);
        }
        self
    }

    /// Sets the databases to sync.
    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = DatabaseScope>) -> Self {
        self.scopes = scopes.into_iter().collect();
        self
    }

    /// Sets the database change page size.
    pub fn with_database_page_limit(mut self, limit: u32) -> Self {
        self.database_page_limit = limit.max(1);
        self
    }

    /// Sets the partition change page size.
    pub fn with_partition_page_limit(mut self, limit: u32) -> Self {
        self.partition_page_limit = limit.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("cloudcache")
    }
}

/// Configuration for retry behavior.
///
/// Retry delays always come from the server; this only bounds how many
/// consecutive retries or cursor resets a single feed performs.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of consecutive retries.
    pub max_attempts: u32,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self::new(0)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(10)
    }
}
