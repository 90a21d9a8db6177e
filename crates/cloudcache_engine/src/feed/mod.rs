//! Incremental change feeds.
//!
//! A feed runs as a spawned task that fetches pages from the remote store,
//! classifies failures and pushes events into a channel. The consumer reads
//! the events through a `FeedStream`. Dropping the stream aborts the task,
//! including a pending retry sleep.

mod database;
mod partition;

pub use database::DatabaseChangeFeed;
pub use partition::PartitionChangeFeed;

use futures::Stream;
use parking_lot::RwLock;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Lifecycle of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// Created, no request issued yet.
    Pending,
    /// Fetching pages.
    Paging,
    /// Every page was fetched.
    Completed,
    /// The feed gave up.
    Failed,
}

impl FeedState {
    /// Returns true once the feed has emitted its terminal event.
    pub fn is_finished(&self) -> bool {
        matches!(self, FeedState::Completed | FeedState::Failed)
    }
}

/// The consumer end of a running feed.
pub struct FeedStream<E> {
    events: UnboundedReceiver<E>,
    state: Arc<RwLock<FeedState>>,
    task: JoinHandle<()>,
}

impl<E> FeedStream<E> {
    /// Current lifecycle state of the feed.
    pub fn state(&self) -> FeedState {
        *self.state.read()
    }
}

impl<E> Stream for FeedStream<E> {
    type Item = E;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl<E> Drop for FeedStream<E> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The producer end of a feed, owned by the feed task.
pub(crate) struct FeedSink<E> {
    events: UnboundedSender<E>,
    state: Arc<RwLock<FeedState>>,
}

impl<E> FeedSink<E> {
    /// Emits a non-terminal event. Returns false once the consumer is gone.
    pub(crate) fn emit(&self, event: E) -> bool {
        self.events.send(event).is_ok()
    }

    /// Emits the terminal event.
    pub(crate) fn finish(&self, event: E, state: FeedState) {
        *self.state.write() = state;
        let _ = self.events.send(event);
    }

    pub(crate) fn set_state(&self, state: FeedState) {
        *self.state.write() = state;
    }
}

/// Spawns a feed task and returns its stream.
pub(crate) fn spawn_feed<E, F, Fut>(run: F) -> FeedStream<E>
where
    E: Send + 'static,
    F: FnOnce(FeedSink<E>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(RwLock::new(FeedState::Pending));
    let sink = FeedSink {
        events: tx,
        state: Arc::clone(&state),
    };
    let task = tokio::spawn(run(sink));
    FeedStream {
        events: rx,
        state,
        task,
    }
}

/// Bounds consecutive retries and cursor resets of one feed.
#[derive(Debug)]
pub(crate) struct RetryBudget {
    max: u32,
    used: u32,
}

impl RetryBudget {
    pub(crate) fn new(max: u32) -> Self {
        Self { max, used: 0 }
    }

    /// Consumes one attempt. Returns false when the budget is exhausted.
    pub(crate) fn take(&mut self) -> bool {
        if self.used >= self.max {
            return false;
        }
        self.used += 1;
        true
    }

    /// Restores the budget after a successful fetch.
    pub(crate) fn reset(&mut self) {
        self.used = 0;
    }
}

/// Halves a page limit. Returns `None` when it cannot shrink further.
pub(crate) fn halve(limit: u32) -> Option<u32> {
    if limit <= 1 {
        None
    } else {
        Some(limit / 2)
    }
}
