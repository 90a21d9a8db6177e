//! Sync coordinator tests against in-memory stores.

use cloudcache_codec::{AssetStore, ASSET_FILENAME_FIELD};
use cloudcache_engine::{
    sequence_cursor, LocalStore, MemoryCache, MemoryLocalStore, MemoryRemoteStore, RemoteOp,
    RetryConfig, SyncConfig, SyncCoordinator, SyncState,
};
use cloudcache_protocol::{
    CursorScope, DatabaseScope, ErrorCode, FetchResult, FieldValue, OperationId, PartitionFetch,
    PartitionId, QueryNotification, QueryReason, RecordId, RemoteError, RemoteNotification,
    RemoteRecord, SubscriptionId,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::tempdir;

type Coordinator = SyncCoordinator<MemoryRemoteStore, MemoryLocalStore, MemoryCache>;

fn note(partition: &str, name: &str) -> RemoteRecord {
    RemoteRecord::new("Note", RecordId::new(partition, name)).unwrap()
}

fn coordinator_with(config: SyncConfig, records: &[(&str, &str)]) -> Coordinator {
    let remote = MemoryRemoteStore::new();
    for (partition, name) in records {
        remote.save_record(note(partition, name)).unwrap();
    }
    SyncCoordinator::new(config, remote, MemoryLocalStore::new(), MemoryCache::new())
}

fn coordinator(records: &[(&str, &str)]) -> Coordinator {
    coordinator_with(SyncConfig::new("test"), records)
}

fn database_changed() -> RemoteNotification {
    RemoteNotification::Database {
        scope: DatabaseScope::Private,
    }
}

fn partition_cursor(sync: &Coordinator, partition: &str) -> Option<cloudcache_protocol::Cursor> {
    sync.local()
        .get_cursor(&CursorScope::Partition(PartitionId::new(partition)))
        .unwrap()
}

fn database_cursor(sync: &Coordinator) -> Option<cloudcache_protocol::Cursor> {
    sync.local()
        .get_cursor(&CursorScope::Database(DatabaseScope::Private))
        .unwrap()
}

#[tokio::test]
async fn first_launch_caches_everything() {
    let sync = coordinator(&[("inbox", "1"), ("inbox", "2"), ("archive", "1")]);

    assert_eq!(sync.on_launch().await, FetchResult::NewData);

    assert_eq!(sync.delegate().len(), 3);
    assert_eq!(sync.delegate().completed_cycles(), 1);
    assert_eq!(sync.state(), SyncState::Synced);
    assert_eq!(database_cursor(&sync), Some(sequence_cursor(5)));
    assert_eq!(partition_cursor(&sync, "inbox"), Some(sequence_cursor(3)));
    assert_eq!(partition_cursor(&sync, "archive"), Some(sequence_cursor(5)));

    let stats = sync.stats();
    assert_eq!(stats.cycles_completed, 1);
    assert_eq!(stats.records_changed, 3);
    assert!(stats.last_sync_time.is_some());
}

#[tokio::test]
async fn nothing_new_is_no_data() {
    let sync = coordinator(&[("inbox", "1")]);
    sync.on_launch().await;
    let writes = sync.local().cursor_writes().len();

    assert_eq!(
        sync.on_remote_notification(database_changed()).await,
        FetchResult::NoData
    );
    assert_eq!(sync.delegate().completed_cycles(), 1);
    assert_eq!(sync.local().cursor_writes().len(), writes);
}

#[tokio::test]
async fn later_changes_are_fetched_from_the_cursor() {
    let sync = coordinator(&[("inbox", "1")]);
    sync.on_launch().await;
    sync.remote().save_record(note("inbox", "2")).unwrap();
    sync.remote().clear_requests();

    assert_eq!(
        sync.on_remote_notification(database_changed()).await,
        FetchResult::NewData
    );
    assert_eq!(sync.delegate().len(), 2);
    assert_eq!(sync.delegate().applied_count(), 2);

    let requests = sync.remote().partition_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].fetches,
        vec![PartitionFetch::new(
            PartitionId::new("inbox"),
            Some(sequence_cursor(2))
        )]
    );
}

#[tokio::test]
async fn crash_mid_batch_keeps_the_cursor_behind_the_failure() {
    let config = SyncConfig::new("test").with_partition_page_limit(1);
    let sync = coordinator_with(config, &[("inbox", "1"), ("inbox", "2"), ("inbox", "3")]);
    sync.delegate().fail_on(RecordId::new("inbox", "2"));

    assert_eq!(sync.on_launch().await, FetchResult::Failed);
    assert_eq!(sync.state(), SyncState::Failed);
    assert_eq!(sync.delegate().len(), 1);
    // Covers inbox/1 only.
    assert_eq!(partition_cursor(&sync, "inbox"), Some(sequence_cursor(2)));
    assert_eq!(database_cursor(&sync), None);
    assert_eq!(sync.stats().failures, 1);
    assert!(sync.stats().last_error.is_some());

    sync.delegate().clear_failures();
    assert_eq!(
        sync.on_remote_notification(database_changed()).await,
        FetchResult::NewData
    );
    assert_eq!(sync.delegate().len(), 3);
    assert_eq!(sync.delegate().applied_count(), 3);
    assert_eq!(partition_cursor(&sync, "inbox"), Some(sequence_cursor(4)));
    assert!(database_cursor(&sync).is_some());
}

#[tokio::test]
async fn expired_partition_is_refetched_alone() {
    let sync = coordinator(&[("inbox", "1"), ("archive", "1")]);
    sync.on_launch().await;
    sync.remote().save_record(note("inbox", "2")).unwrap();
    sync.remote().save_record(note("archive", "2")).unwrap();
    sync.remote()
        .expire_partition_cursors(&PartitionId::new("inbox"));
    sync.remote().clear_requests();

    assert_eq!(
        sync.on_remote_notification(database_changed()).await,
        FetchResult::NewData
    );

    let requests = sync.remote().partition_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].fetches.len(), 2);
    assert_eq!(
        requests[1].fetches,
        vec![PartitionFetch::new(PartitionId::new("inbox"), None)]
    );
    assert_eq!(partition_cursor(&sync, "archive"), Some(sequence_cursor(6)));
    assert_eq!(partition_cursor(&sync, "inbox"), Some(sequence_cursor(5)));
    assert_eq!(sync.delegate().len(), 4);
    assert!(sync.local().cursor_writes().contains(&(
        CursorScope::Partition(PartitionId::new("inbox")),
        None
    )));
}

#[tokio::test]
async fn expired_database_cursor_resyncs_from_scratch() {
    let sync = coordinator(&[("inbox", "1")]);
    sync.on_launch().await;
    sync.remote().expire_database_cursors(DatabaseScope::Private);
    sync.remote().save_record(note("archive", "1")).unwrap();
    sync.remote().clear_requests();

    assert_eq!(
        sync.on_remote_notification(database_changed()).await,
        FetchResult::NewData
    );
    let requests = sync.remote().database_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].cursor, None);
    assert!(sync.local().cursor_writes().contains(&(
        CursorScope::Database(DatabaseScope::Private),
        None
    )));
    assert_eq!(sync.delegate().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn retry_waits_and_succeeds() {
    let sync = coordinator(&[("inbox", "1")]);
    sync.remote().fail_next(
        RemoteOp::FetchPartitionChanges,
        RemoteError::new(ErrorCode::ServiceUnavailable).with_retry_after(Duration::from_secs(30)),
    );

    let started = tokio::time::Instant::now();
    assert_eq!(sync.on_launch().await, FetchResult::NewData);
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(sync.remote().partition_requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_the_pass() {
    let config = SyncConfig::new("test").with_retry(RetryConfig::new(1));
    let sync = coordinator_with(config, &[("inbox", "1")]);
    for _ in 0..2 {
        sync.remote().fail_next(
            RemoteOp::FetchPartitionChanges,
            RemoteError::new(ErrorCode::RequestRateLimited)
                .with_retry_after(Duration::from_secs(5)),
        );
    }

    assert_eq!(sync.on_launch().await, FetchResult::Failed);
    assert!(sync.delegate().is_empty());
    assert_eq!(database_cursor(&sync), None);
}

#[tokio::test]
async fn database_cursor_waits_for_the_partition_pass() {
    let sync = coordinator(&[("inbox", "1")]);
    sync.remote().fail_partition_next(
        "inbox",
        RemoteError::new(ErrorCode::QuotaExceeded),
    );

    assert_eq!(sync.on_launch().await, FetchResult::Failed);
    assert_eq!(database_cursor(&sync), None);
    assert!(sync.local().cursor_writes().is_empty());
}

#[tokio::test]
async fn partition_changes_are_coalesced() {
    let config = SyncConfig::new("test").with_database_page_limit(1);
    let sync = coordinator_with(config, &[("inbox", "1"), ("inbox", "2"), ("inbox", "3")]);

    assert_eq!(sync.on_launch().await, FetchResult::NewData);

    assert_eq!(sync.remote().database_requests().len(), 4);
    let requests = sync.remote().partition_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].fetches.len(), 1);
    assert_eq!(sync.delegate().len(), 3);
}

#[tokio::test]
async fn oversized_pages_are_halved() {
    let config = SyncConfig::new("test")
        .with_database_page_limit(8)
        .with_partition_page_limit(8);
    let sync = coordinator_with(config, &[("inbox", "1"), ("inbox", "2"), ("inbox", "3")]);
    sync.remote().set_max_page_size(Some(2));

    assert_eq!(sync.on_launch().await, FetchResult::NewData);

    let limits: Vec<u32> = sync
        .remote()
        .database_requests()
        .iter()
        .map(|request| request.limit)
        .collect();
    assert_eq!(limits, vec![8, 4, 2, 2]);
    assert_eq!(sync.delegate().len(), 3);
}

#[tokio::test]
async fn deleted_partition_is_dropped() {
    let sync = coordinator(&[("inbox", "1"), ("archive", "1")]);
    sync.on_launch().await;
    sync.remote().delete_partition(&PartitionId::new("inbox"));

    assert_eq!(
        sync.on_remote_notification(database_changed()).await,
        FetchResult::NewData
    );
    assert_eq!(
        sync.delegate().deleted_partitions(),
        vec![PartitionId::new("inbox")]
    );
    assert_eq!(sync.delegate().len(), 1);
    assert_eq!(partition_cursor(&sync, "inbox"), None);
    assert_eq!(sync.stats().partitions_deleted, 1);
}

#[tokio::test]
async fn deleted_record_reaches_the_delegate() {
    let sync = coordinator(&[("inbox", "1"), ("inbox", "2")]);
    sync.on_launch().await;
    sync.remote().delete_record(&RecordId::new("inbox", "1"));

    assert_eq!(
        sync.on_remote_notification(database_changed()).await,
        FetchResult::NewData
    );
    assert_eq!(
        sync.delegate().deleted_records(),
        vec![RecordId::new("inbox", "1")]
    );
    assert_eq!(sync.delegate().len(), 1);
    assert_eq!(sync.stats().records_deleted, 1);
}

#[tokio::test]
async fn notifications_are_dispatched_by_kind() {
    let sync = coordinator(&[("inbox", "1")]);

    let query = QueryNotification {
        subscription_id: SubscriptionId::new("starred"),
        record_id: Some(RecordId::new("inbox", "1")),
        reason: QueryReason::RecordUpdated,
        fields: BTreeMap::new(),
    };
    assert_eq!(
        sync.on_remote_notification(RemoteNotification::Query(query))
            .await,
        FetchResult::NewData
    );
    assert_eq!(sync.delegate().query_notifications().len(), 1);

    assert_eq!(
        sync.on_remote_notification(RemoteNotification::ReadNotification)
            .await,
        FetchResult::NoData
    );

    let zone = RemoteNotification::RecordZone {
        partition: PartitionId::new("inbox"),
    };
    assert_eq!(sync.on_remote_notification(zone).await, FetchResult::NewData);
    assert_eq!(sync.delegate().len(), 1);
    assert!(sync.remote().database_requests().is_empty());
    assert_eq!(database_cursor(&sync), None);
}

#[tokio::test]
async fn subscription_is_created_once_per_scope() {
    let config = SyncConfig::new("test").with_scopes([DatabaseScope::Private, DatabaseScope::Shared]);
    let sync = coordinator_with(config, &[]);

    sync.on_launch().await;
    sync.on_launch().await;

    assert_eq!(sync.remote().subscription_creates(), 2);
    assert!(sync
        .local()
        .get_subscription_id(DatabaseScope::Shared)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn stored_subscription_is_trusted() {
    let sync = coordinator(&[]);
    sync.local()
        .set_subscription_id(DatabaseScope::Private, SubscriptionId::new("known"))
        .unwrap();

    sync.on_launch().await;

    assert_eq!(sync.remote().subscription_creates(), 0);
}

#[tokio::test]
async fn bootstrap_failures_do_not_block_the_fetch() {
    let config = SyncConfig::new("test").with_partition("inbox");
    let sync = coordinator_with(config, &[("archive", "1")]);
    sync.remote().fail_next(
        RemoteOp::CreatePartitions,
        RemoteError::new(ErrorCode::NetworkFailure),
    );
    sync.remote().fail_next(
        RemoteOp::CreateSubscription,
        RemoteError::new(ErrorCode::NetworkFailure),
    );

    assert_eq!(sync.on_launch().await, FetchResult::NewData);
    assert_eq!(sync.delegate().len(), 1);
    assert_eq!(
        sync.local().get_subscription_id(DatabaseScope::Private).unwrap(),
        None
    );
}

#[tokio::test]
async fn declared_partitions_are_created() {
    let config = SyncConfig::new("test").with_partition("inbox");
    let sync = coordinator_with(config, &[]);

    sync.on_launch().await;

    assert_eq!(sync.remote().partitions(), vec![PartitionId::new("inbox")]);
}

#[tokio::test]
async fn pending_operations_are_resumed() {
    let sync = coordinator(&[]);
    sync.remote().add_pending_operation(OperationId::new("op-1"));
    sync.remote().add_pending_operation(OperationId::new("op-2"));

    sync.on_launch().await;
    sync.join_resumed_operations().await;

    let mut resumed = sync.remote().resumed_operations();
    resumed.sort();
    assert_eq!(
        resumed,
        vec![OperationId::new("op-1"), OperationId::new("op-2")]
    );
}

#[tokio::test]
async fn stale_blobs_are_collected() {
    let dir = tempdir().unwrap();
    let store = AssetStore::open(dir.path(), "Photo").unwrap();
    let stale = store.put("p1", b"old").unwrap();
    store.write_named("p1-current.bin", b"new").unwrap();
    store.write_named("p2-other.bin", b"other").unwrap();

    let remote = MemoryRemoteStore::new();
    let mut photo = RemoteRecord::new("Photo", RecordId::new("gallery", "p1")).unwrap();
    photo.set(ASSET_FILENAME_FIELD, FieldValue::Text("p1-current.bin".into()));
    remote.save_record(photo).unwrap();
    let sync = SyncCoordinator::new(
        SyncConfig::new("test"),
        remote,
        MemoryLocalStore::new(),
        MemoryCache::new(),
    )
    .with_asset_store(store.clone());

    assert_eq!(sync.on_launch().await, FetchResult::NewData);
    assert!(!store.contains(&stale));
    assert!(store.contains("p1-current.bin"));
    assert!(store.contains("p2-other.bin"));

    sync.remote().delete_record(&RecordId::new("gallery", "p1"));
    sync.on_remote_notification(database_changed()).await;
    assert!(!store.contains("p1-current.bin"));
    assert!(store.contains("p2-other.bin"));
}

mod entities {
    use super::*;
    use cloudcache_codec::{
        asset_field_name, CodecError, CodecResult, Entity, FieldDescriptor, HasAssetField,
        HasMetadata, RecordCodec,
    };
    use cloudcache_engine::EntityCache;
    use cloudcache_protocol::{Asset, SystemMetadata};

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Memo {
        metadata: Option<SystemMetadata>,
        saved: bool,
        title: String,
    }

    impl HasMetadata for Memo {
        fn metadata(&self) -> Option<&SystemMetadata> {
            self.metadata.as_ref()
        }
        fn set_metadata(&mut self, metadata: Option<SystemMetadata>) {
            self.metadata = metadata;
        }
        fn is_saved_remotely(&self) -> bool {
            self.saved
        }
        fn set_saved_remotely(&mut self, saved: bool) {
            self.saved = saved;
        }
    }

    fn memo_title(m: &Memo) -> Option<FieldValue> {
        Some(FieldValue::Text(m.title.clone()))
    }
    fn set_memo_title(m: &mut Memo, value: FieldValue) -> CodecResult<()> {
        m.title = value
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| CodecError::field_mismatch("title", "text", value.kind()))?;
        Ok(())
    }

    impl Entity for Memo {
        const RECORD_TYPE: &'static str = "Memo";
        const PARTITION: &'static str = "inbox";
        const FIELDS: &'static [FieldDescriptor<Self>] =
            &[FieldDescriptor::value("title", memo_title, set_memo_title)];
    }

    #[tokio::test]
    async fn entity_cache_decodes_its_own_type() {
        let codec = RecordCodec::new();
        let remote = MemoryRemoteStore::new();
        let mut memo = Memo {
            title: "groceries".into(),
            ..Memo::default()
        };
        memo.fill_new_metadata().unwrap();
        remote
            .save_record(codec.to_remote_record(&memo).unwrap())
            .unwrap();
        remote.save_record(note("inbox", "other")).unwrap();

        let sync = SyncCoordinator::new(
            SyncConfig::new("test"),
            remote,
            MemoryLocalStore::new(),
            EntityCache::<Memo>::new(codec),
        );
        assert_eq!(sync.on_launch().await, FetchResult::NewData);

        let cached = sync.delegate().entities();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].title, "groceries");
        assert!(cached[0].saved);
    }

    #[derive(Debug, Default, Clone)]
    struct Snapshot {
        metadata: Option<SystemMetadata>,
        saved: bool,
        caption: String,
        filename: Option<String>,
    }

    impl HasMetadata for Snapshot {
        fn metadata(&self) -> Option<&SystemMetadata> {
            self.metadata.as_ref()
        }
        fn set_metadata(&mut self, metadata: Option<SystemMetadata>) {
            self.metadata = metadata;
        }
        fn is_saved_remotely(&self) -> bool {
            self.saved
        }
        fn set_saved_remotely(&mut self, saved: bool) {
            self.saved = saved;
        }
    }

    impl HasAssetField for Snapshot {
        fn asset_filename(&self) -> Option<&str> {
            self.filename.as_deref()
        }
        fn set_asset_filename(&mut self, filename: Option<String>) {
            self.filename = filename;
        }
    }

    fn snapshot_caption(s: &Snapshot) -> Option<FieldValue> {
        Some(FieldValue::Text(s.caption.clone()))
    }
    fn set_snapshot_caption(s: &mut Snapshot, value: FieldValue) -> CodecResult<()> {
        s.caption = value
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| CodecError::field_mismatch("caption", "text", value.kind()))?;
        Ok(())
    }

    impl Entity for Snapshot {
        const RECORD_TYPE: &'static str = "Snapshot";
        const PARTITION: &'static str = "inbox";
        const FIELDS: &'static [FieldDescriptor<Self>] = &[FieldDescriptor::value(
            "caption",
            snapshot_caption,
            set_snapshot_caption,
        )];

        fn asset_field(&self) -> Option<&dyn HasAssetField> {
            Some(self)
        }

        fn asset_field_mut(&mut self) -> Option<&mut dyn HasAssetField> {
            Some(self)
        }
    }

    #[tokio::test]
    async fn entity_cache_stores_downloaded_blobs() {
        let dir = tempdir().unwrap();
        let remote = MemoryRemoteStore::new();
        let mut record = RemoteRecord::new("Snapshot", RecordId::new("inbox", "s1")).unwrap();
        record.set("caption", FieldValue::Text("beach".into()));
        record.set(
            asset_field_name("Snapshot"),
            FieldValue::Asset(Asset {
                filename: "s1-first.bin".into(),
                data: b"pixels".to_vec(),
            }),
        );
        remote.save_record(record).unwrap();

        let sync = SyncCoordinator::new(
            SyncConfig::new("test"),
            remote,
            MemoryLocalStore::new(),
            EntityCache::<Snapshot>::new(RecordCodec::with_asset_root(dir.path())),
        );
        assert_eq!(sync.on_launch().await, FetchResult::NewData);

        let cached = sync.delegate().entities();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].filename.as_deref(), Some("s1-first.bin"));
        let store = AssetStore::open(dir.path(), "Snapshot").unwrap();
        assert_eq!(store.get("s1-first.bin").unwrap(), Some(b"pixels".to_vec()));
    }
}
