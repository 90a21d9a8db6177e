//! Change feed tests against the in-memory remote store.

use cloudcache_engine::{
    sequence_cursor, DatabaseChangeFeed, FeedState, MemoryRemoteStore, PartitionChangeFeed,
    RemoteOp, RetryConfig,
};
use cloudcache_protocol::{
    DatabaseEvent, DatabaseScope, ErrorCode, FailReason, PartitionEvent, PartitionFetch,
    PartitionId, RecordId, RemoteError, RemoteRecord,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

fn note(partition: &str, name: &str) -> RemoteRecord {
    RemoteRecord::new("Note", RecordId::new(partition, name)).unwrap()
}

fn remote_with(records: &[(&str, &str)]) -> Arc<MemoryRemoteStore> {
    let remote = MemoryRemoteStore::new();
    for (partition, name) in records {
        remote.save_record(note(partition, name)).unwrap();
    }
    Arc::new(remote)
}

#[tokio::test]
async fn database_feed_reports_changes_then_cursor_then_completion() {
    let remote = remote_with(&[("inbox", "1"), ("archive", "1")]);

    let mut feed = DatabaseChangeFeed::new(remote, DatabaseScope::Private, None).start();
    let events: Vec<DatabaseEvent> = (&mut feed).collect().await;

    let inbox = DatabaseEvent::PartitionChanged(PartitionId::new("inbox"));
    let archive = DatabaseEvent::PartitionChanged(PartitionId::new("archive"));
    assert_eq!(
        events,
        vec![
            inbox.clone(),
            inbox,
            archive.clone(),
            archive,
            DatabaseEvent::CursorAdvanced(sequence_cursor(4)),
            DatabaseEvent::Completed,
        ]
    );
    assert_eq!(feed.state(), FeedState::Completed);
}

#[tokio::test]
async fn database_feed_pages_until_done() {
    let remote = remote_with(&[("inbox", "1"), ("inbox", "2"), ("inbox", "3")]);

    let feed = DatabaseChangeFeed::new(Arc::clone(&remote), DatabaseScope::Private, None)
        .with_limit(2)
        .start();
    let events: Vec<DatabaseEvent> = feed.collect().await;

    let cursors: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, DatabaseEvent::CursorAdvanced(_)))
        .collect();
    assert_eq!(cursors.len(), 2);
    assert_eq!(events.last(), Some(&DatabaseEvent::Completed));
    assert_eq!(remote.database_requests().len(), 2);
    assert_eq!(remote.database_requests()[1].cursor, Some(sequence_cursor(2)));
}

#[tokio::test]
async fn database_feed_restarts_from_scratch_after_expiry() {
    let remote = remote_with(&[("inbox", "1")]);
    remote.expire_database_cursors(DatabaseScope::Private);

    let stale = Some(sequence_cursor(1));
    let feed = DatabaseChangeFeed::new(Arc::clone(&remote), DatabaseScope::Private, stale).start();
    let events: Vec<DatabaseEvent> = feed.collect().await;

    assert_eq!(events.first(), Some(&DatabaseEvent::CursorReset));
    assert_eq!(events.last(), Some(&DatabaseEvent::Completed));
    let requests = remote.database_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].cursor, None);
}

#[tokio::test]
async fn database_feed_fails_on_fatal_error() {
    let remote = remote_with(&[("inbox", "1")]);
    remote.fail_next(
        RemoteOp::FetchDatabaseChanges,
        RemoteError::new(ErrorCode::QuotaExceeded),
    );

    let mut feed = DatabaseChangeFeed::new(remote, DatabaseScope::Private, None).start();
    let events: Vec<DatabaseEvent> = (&mut feed).collect().await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        DatabaseEvent::Failed(FailReason::QuotaExceeded(_))
    ));
    assert_eq!(feed.state(), FeedState::Failed);
}

#[tokio::test(start_paused = true)]
async fn database_feed_waits_for_the_server_hint() {
    let remote = remote_with(&[("inbox", "1")]);
    remote.fail_next(
        RemoteOp::FetchDatabaseChanges,
        RemoteError::new(ErrorCode::ServiceUnavailable).with_retry_after(Duration::from_secs(30)),
    );

    let started = tokio::time::Instant::now();
    let feed = DatabaseChangeFeed::new(Arc::clone(&remote), DatabaseScope::Private, None).start();
    let events: Vec<DatabaseEvent> = feed.collect().await;

    assert_eq!(events.last(), Some(&DatabaseEvent::Completed));
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(remote.database_requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn database_feed_gives_up_after_the_retry_budget() {
    let remote = remote_with(&[("inbox", "1")]);
    for _ in 0..3 {
        remote.fail_next(
            RemoteOp::FetchDatabaseChanges,
            RemoteError::new(ErrorCode::ZoneBusy).with_retry_after(Duration::from_secs(1)),
        );
    }

    let feed = DatabaseChangeFeed::new(Arc::clone(&remote), DatabaseScope::Private, None)
        .with_retry(RetryConfig::new(2))
        .start();
    let events: Vec<DatabaseEvent> = feed.collect().await;

    assert!(matches!(
        events.last(),
        Some(DatabaseEvent::Failed(FailReason::Unknown(_)))
    ));
    assert_eq!(remote.database_requests().len(), 3);
}

#[tokio::test]
async fn partition_feed_records_arrive_before_their_cursor() {
    let remote = remote_with(&[("inbox", "1"), ("inbox", "2")]);
    let inbox = PartitionId::new("inbox");

    let feed = PartitionChangeFeed::new(remote, vec![PartitionFetch::new(inbox.clone(), None)])
        .with_limit(1)
        .start();
    let events: Vec<PartitionEvent> = feed.collect().await;

    let summary: Vec<String> = events
        .iter()
        .map(|event| match event {
            PartitionEvent::RecordChanged(record) => format!("changed {}", record.id),
            PartitionEvent::CursorAdvanced(partition, cursor) => {
                format!("cursor {partition} {cursor:?}")
            }
            other => format!("{other:?}"),
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            "changed inbox/1".to_string(),
            format!("cursor inbox {:?}", sequence_cursor(2)),
            "changed inbox/2".to_string(),
            format!("cursor inbox {:?}", sequence_cursor(3)),
            "Completed".to_string(),
        ]
    );
}

#[tokio::test]
async fn partition_feed_resets_only_the_expired_partition() {
    let remote = remote_with(&[("inbox", "1"), ("archive", "1")]);
    let inbox = PartitionId::new("inbox");
    let archive = PartitionId::new("archive");
    remote.expire_partition_cursors(&inbox);
    remote.clear_requests();

    let feed = PartitionChangeFeed::new(
        Arc::clone(&remote),
        vec![
            PartitionFetch::new(inbox.clone(), Some(sequence_cursor(1))),
            PartitionFetch::new(archive.clone(), Some(sequence_cursor(3))),
        ],
    )
    .start();
    let events: Vec<PartitionEvent> = feed.collect().await;

    assert!(events.contains(&PartitionEvent::CursorReset(inbox.clone())));
    assert!(!events.contains(&PartitionEvent::CursorReset(archive)));
    assert_eq!(events.last(), Some(&PartitionEvent::Completed));

    let requests = remote.partition_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].fetches, vec![PartitionFetch::new(inbox, None)]);
}

#[tokio::test]
async fn partition_feed_fails_on_unknown_partition() {
    let remote = Arc::new(MemoryRemoteStore::new());

    let mut feed = PartitionChangeFeed::new(
        remote,
        vec![PartitionFetch::new(PartitionId::new("missing"), None)],
    )
    .start();
    let events: Vec<PartitionEvent> = (&mut feed).collect().await;

    assert!(matches!(
        events.as_slice(),
        [PartitionEvent::Failed(FailReason::UnhandledCode(_))]
    ));
    assert_eq!(feed.state(), FeedState::Failed);
}

#[tokio::test]
async fn partition_feed_halves_the_page_on_limit_exceeded() {
    let remote = remote_with(&[("inbox", "1"), ("inbox", "2"), ("inbox", "3")]);
    remote.set_max_page_size(Some(2));

    let feed = PartitionChangeFeed::new(
        Arc::clone(&remote),
        vec![PartitionFetch::new(PartitionId::new("inbox"), None)],
    )
    .with_limit(8)
    .start();
    let events: Vec<PartitionEvent> = feed.collect().await;

    assert_eq!(events.last(), Some(&PartitionEvent::Completed));
    let limits: Vec<u32> = remote
        .partition_requests()
        .iter()
        .map(|request| request.limit)
        .collect();
    assert_eq!(limits, vec![8, 4, 2, 2]);
}

#[tokio::test]
async fn partition_feed_gives_up_when_a_cursor_stops_moving() {
    let remote = remote_with(&[("inbox", "1")]);
    remote.stall_partition("inbox", true);

    let mut feed = PartitionChangeFeed::new(
        Arc::clone(&remote),
        vec![PartitionFetch::new(PartitionId::new("inbox"), None)],
    )
    .with_retry(RetryConfig::new(2))
    .start();
    let events: Vec<PartitionEvent> = (&mut feed).collect().await;

    assert!(matches!(
        events.as_slice(),
        [PartitionEvent::Failed(FailReason::Unknown(_))]
    ));
    assert_eq!(feed.state(), FeedState::Failed);
    assert_eq!(remote.partition_requests().len(), 3);
}

#[tokio::test]
async fn partition_feed_fails_when_the_whole_batch_expires() {
    let remote = remote_with(&[("inbox", "1"), ("archive", "1")]);
    remote.fail_next(
        RemoteOp::FetchPartitionChanges,
        RemoteError::new(ErrorCode::ChangeTokenExpired),
    );

    let mut feed = PartitionChangeFeed::new(
        Arc::clone(&remote),
        vec![
            PartitionFetch::new(PartitionId::new("inbox"), Some(sequence_cursor(2))),
            PartitionFetch::new(PartitionId::new("archive"), Some(sequence_cursor(4))),
        ],
    )
    .start();
    let events: Vec<PartitionEvent> = (&mut feed).collect().await;

    assert!(matches!(
        events.as_slice(),
        [PartitionEvent::Failed(FailReason::ChangeTokenExpired(_))]
    ));
    assert_eq!(feed.state(), FeedState::Failed);
    assert_eq!(remote.partition_requests().len(), 1);
}
