//! Partition-level feed: record changes of several partitions.

use super::{halve, spawn_feed, FeedSink, FeedState, FeedStream, RetryBudget};
use crate::config::RetryConfig;
use crate::remote::RemoteStore;
use cloudcache_protocol::{
    classify, Cursor, FailReason, PartitionChange, PartitionEvent, PartitionFetch, PartitionId,
    ResultType,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fetches record changes of several partitions until each is exhausted.
///
/// Partitions reporting `more_coming` are re-requested with their new cursor.
/// Failures are handled per partition: a retry or an expired cursor only
/// re-requests the affected partition, leaving the others alone. An expiry
/// reported for the whole batch names no partition and fails the feed.
pub struct PartitionChangeFeed<R: RemoteStore> {
    remote: Arc<R>,
    requests: Vec<PartitionFetch>,
    limit: u32,
    retry: RetryConfig,
}

/// What to do after one batch.
#[derive(Default)]
struct BatchOutcome {
    next: BTreeMap<PartitionId, Option<Cursor>>,
    delay: Option<Duration>,
    chunk: bool,
    setbacks: bool,
}

impl<R: RemoteStore> PartitionChangeFeed<R> {
    /// Creates a feed for the given partitions and their last cursors.
    pub fn new(remote: Arc<R>, requests: Vec<PartitionFetch>) -> Self {
        Self {
            remote,
            requests,
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
    pub fn start(self) -> FeedStream<PartitionEvent> {
        spawn_feed(move |sink| self.run(sink))
    }

    async fn run(self, sink: FeedSink<PartitionEvent>) {
        let mut outstanding: BTreeMap<PartitionId, Option<Cursor>> = self
            .requests
            .iter()
            .map(|fetch| (fetch.partition.clone(), fetch.cursor.clone()))
            .collect();
        let mut limit = self.limit;
        let mut budget = RetryBudget::new(self.retry.max_attempts);
        let fail = |reason: FailReason| {
            warn!(%reason, "partition feed failed");
            sink.finish(PartitionEvent::Failed(reason), FeedState::Failed);
        };
        let exhausted = || {
            FailReason::Unknown(format!(
                "gave up after {} retries",
                self.retry.max_attempts
            ))
        };

        sink.set_state(FeedState::Paging);
        while !outstanding.is_empty() {
            let requests: Vec<PartitionFetch> = outstanding
                .iter()
                .map(|(partition, cursor)| PartitionFetch::new(partition.clone(), cursor.clone()))
                .collect();

            let asked = outstanding.clone();
            let batch = match self.remote.fetch_partition_changes(&requests, limit).await {
                Ok(batch) => batch,
                Err(error) => match classify(Some(&error)) {
                    ResultType::Retry { after, .. } => {
                        if !budget.take() {
                            return fail(exhausted());
                        }
                        warn!(
                            ?after,
                            partitions = outstanding.len(),
                            "partition fetch will be retried"
                        );
                        tokio::time::sleep(after).await;
                        continue;
                    }
                    ResultType::Chunk => match halve(limit) {
                        Some(smaller) => {
                            debug!(limit = smaller, "partition batch too large");
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
                    ResultType::Success => return fail(FailReason::Unknown(error.to_string())),
                },
            };

            let mut outcome = BatchOutcome::default();
            let mut reported = BTreeSet::new();
            for change in batch.changes {
                match change {
                    PartitionChange::RecordChanged(record) => {
                        if !sink.emit(PartitionEvent::RecordChanged(record)) {
                            return;
                        }
                    }
                    PartitionChange::RecordDeleted(id) => {
                        if !sink.emit(PartitionEvent::RecordDeleted(id)) {
                            return;
                        }
                    }
                    PartitionChange::CursorUpdated { partition, cursor } => {
                        if !advance(&sink, &mut outstanding, partition, cursor) {
                            return;
                        }
                    }
                    PartitionChange::PartitionFinished(done) => {
                        let partition = done.partition;
                        reported.insert(partition.clone());
                        match classify(done.error.as_ref()) {
                            ResultType::Success => {
                                if let Some(cursor) = done.cursor {
                                    let partition = partition.clone();
                                    if !advance(&sink, &mut outstanding, partition, cursor) {
                                        return;
                                    }
                                }
                                if done.more_coming {
                                    let cursor = outstanding.get(&partition).cloned().flatten();
                                    // No progress since the request counts against the budget.
                                    if asked.get(&partition) == Some(&cursor) {
                                        debug!(%partition, "partition cursor did not move");
                                        outcome.setbacks = true;
                                    }
                                    outcome.next.insert(partition, cursor);
                                }
                            }
                            ResultType::Retry { after, .. } => {
                                debug!(%partition, ?after, "partition will be retried");
                                outcome.delay = outcome.delay.max(Some(after));
                                outcome.setbacks = true;
                                let cursor = outstanding.get(&partition).cloned().flatten();
                                outcome.next.insert(partition, cursor);
                            }
                            ResultType::Recoverable(FailReason::ChangeTokenExpired(_)) => {
                                warn!(%partition, "partition cursor expired, fetching from scratch");
                                outcome.setbacks = true;
                                if let Some(cursor) = outstanding.get_mut(&partition) {
                                    *cursor = None;
                                }
                                if !sink.emit(PartitionEvent::CursorReset(partition.clone())) {
                                    return;
                                }
                                outcome.next.insert(partition, None);
                            }
                            ResultType::Chunk => {
                                outcome.chunk = true;
                                let cursor = outstanding.get(&partition).cloned().flatten();
                                outcome.next.insert(partition, cursor);
                            }
                            ResultType::Recoverable(reason) | ResultType::Fatal(reason) => {
                                return fail(reason);
                            }
                        }
                    }
                }
            }

            // A partition the batch said nothing about is asked for again.
            for (partition, cursor) in &outstanding {
                if !reported.contains(partition) {
                    outcome.next.insert(partition.clone(), cursor.clone());
                }
            }
            if reported.is_empty() {
                outcome.setbacks = true;
            }

            if outcome.chunk {
                match halve(limit) {
                    Some(smaller) => limit = smaller,
                    None => {
                        return fail(FailReason::Unknown(
                            "request too large at minimum page size".into(),
                        ))
                    }
                }
            }
            if outcome.setbacks {
                if !budget.take() {
                    return fail(exhausted());
                }
            } else {
                budget.reset();
            }
            if let Some(delay) = outcome.delay {
                tokio::time::sleep(delay).await;
            }
            outstanding = outcome.next;
        }

        info!("partition changes fetched");
        sink.finish(PartitionEvent::Completed, FeedState::Completed);
    }
}

/// Records and emits a partition cursor unless it is already current.
fn advance(
    sink: &FeedSink<PartitionEvent>,
    outstanding: &mut BTreeMap<PartitionId, Option<Cursor>>,
    partition: PartitionId,
    cursor: Cursor,
) -> bool {
    let Some(current) = outstanding.get_mut(&partition) else {
        return true;
    };
    if current.as_ref() == Some(&cursor) {
        return true;
    }
    *current = Some(cursor.clone());
    sink.emit(PartitionEvent::CursorAdvanced(partition, cursor))
}
