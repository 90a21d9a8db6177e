//! Database-level feed: which partitions changed since a cursor.

use super::{halve, spawn_feed, FeedSink, FeedState, FeedStream, RetryBudget};
use crate::config::RetryConfig;
use crate::remote::RemoteStore;
use cloudcache_protocol::{
    classify, Cursor, DatabaseChange, DatabaseEvent, DatabaseScope, FailReason, ResultType,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fetches every page of partition-level changes of one database.
///
/// Emits `PartitionChanged`, `PartitionDeleted` and `CursorAdvanced` in
/// server order, then exactly one `Completed` or `Failed`. An expired cursor
/// emits `CursorReset` and restarts the fetch from scratch.
pub struct DatabaseChangeFeed<R: RemoteStore> {
    remote: Arc<R>,
    scope: DatabaseScope,
    cursor: Option<Cursor>,
    limit: u32,
    retry: RetryConfig,
}

impl<R: RemoteStore> DatabaseChangeFeed<R> {
    /// Creates a feed starting after `cursor`; `None` fetches everything.
    pub fn new(remote: Arc<R>, scope: DatabaseScope, cursor: Option<Cursor>) -> Self {
        Self {
            remote,
            scope,
            cursor,
            limit: 100,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the page size.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Starts the feed.
    pub fn start(self) -> FeedStream<DatabaseEvent> {
        spawn_feed(move |sink| self.run(sink))
    }

    async fn run(self, sink: FeedSink<DatabaseEvent>) {
        let scope = self.scope;
        let mut cursor = self.cursor;
        let mut limit = self.limit;
        let mut budget = RetryBudget::new(self.retry.max_attempts);
        let fail = |reason: FailReason| {
            warn!(%scope, %reason, "database feed failed");
            sink.finish(DatabaseEvent::Failed(reason), FeedState::Failed);
        };

        sink.set_state(FeedState::Paging);
        loop {
            let page = match self
                .remote
                .fetch_database_changes(scope, cursor.as_ref(), limit)
                .await
            {
                Ok(page) => page,
                Err(error) => match classify(Some(&error)) {
                    ResultType::Retry { after, .. } => {
                        if !budget.take() {
                            return fail(FailReason::Unknown(format!(
                                "gave up after {} retries",
                                self.retry.max_attempts
                            )));
                        }
                        warn!(%scope, ?after, "database fetch will be retried");
                        tokio::time::sleep(after).await;
                        continue;
                    }
                    ResultType::Recoverable(FailReason::ChangeTokenExpired(_)) => {
                        if !budget.take() {
                            return fail(FailReason::Unknown(
                                "database cursor keeps expiring".into(),
                            ));
                        }
                        warn!(%scope, "database cursor expired, fetching from scratch");
                        cursor = None;
                        if !sink.emit(DatabaseEvent::CursorReset) {
                            return;
                        }
                        continue;
                    }
                    ResultType::Chunk => match halve(limit) {
                        Some(smaller) => {
                            debug!(%scope, limit = smaller, "database page too large");
                            limit = smaller;
                            continue;
                        }
                        None => {
                            return fail(FailReason::Unknown(
                                "request too large at minimum page size".into(),
                            ))
                        }
                    },
                    ResultType::Recoverable(reason) | ResultType::Fatal(reason) => {
                        return fail(reason)
                    }
                    ResultType::Success => {
                        return fail(FailReason::Unknown(error.to_string()));
                    }
                },
            };
            budget.reset();

            let mut emitted = cursor.clone();
            for change in page.changes {
                let event = match change {
                    DatabaseChange::PartitionChanged(partition) => {
                        DatabaseEvent::PartitionChanged(partition)
                    }
                    DatabaseChange::PartitionDeleted(partition) => {
                        DatabaseEvent::PartitionDeleted(partition)
                    }
                    DatabaseChange::CursorUpdated(updated) => {
                        if emitted.as_ref() == Some(&updated) {
                            continue;
                        }
                        emitted = Some(updated.clone());
                        cursor = Some(updated.clone());
                        DatabaseEvent::CursorAdvanced(updated)
                    }
                };
                if !sink.emit(event) {
                    return;
                }
            }

            if let Some(last) = page.cursor {
                if emitted.as_ref() != Some(&last)
                    && !sink.emit(DatabaseEvent::CursorAdvanced(last.clone()))
                {
                    return;
                }
                cursor = Some(last);
            }

            if !page.more_coming {
                info!(%scope, "database changes fetched");
                sink.finish(DatabaseEvent::Completed, FeedState::Completed);
                return;
            }
        }
    }
}
