//! Sync command implementation.

use super::state::JsonFileStore;
use cloudcache_engine::{MemoryCache, MemoryRemoteStore, SyncConfig, SyncCoordinator};
use cloudcache_protocol::{DatabaseScope, FetchResult, FieldValue, RecordId, RemoteRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One record of a fixture file.
#[derive(Debug, Deserialize)]
pub struct FixtureRecord {
    /// Record type tag.
    pub record_type: String,
    /// Partition holding the record.
    pub partition: String,
    /// Record name, unique within the partition.
    pub name: String,
    /// Database of the partition; private when absent.
    #[serde(default)]
    pub scope: Option<DatabaseScope>,
    /// Field values.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

/// Sync command result.
#[derive(Debug, Serialize)]
pub struct SyncReport {
    /// Outcome of the bootstrap.
    pub result: FetchResult,
    /// Records changed during this run.
    pub records_changed: u64,
    /// Records deleted during this run.
    pub records_deleted: u64,
    /// Cursors stored after the run.
    pub cursors: usize,
    /// Last error, if the run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Every cached record.
    pub records: Vec<CachedRecord>,
}

/// A cached record, flattened for output.
#[derive(Debug, Serialize)]
pub struct CachedRecord {
    /// Record type tag.
    pub record_type: String,
    /// `partition/name`.
    pub id: String,
    /// Field values.
    pub fields: BTreeMap<String, FieldValue>,
}

/// Runs the sync command.
pub fn run(
    fixture: &Path,
    state: &Path,
    app: &str,
    partitions: &[String],
    shared: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let records: Vec<FixtureRecord> = serde_json::from_slice(&fs::read(fixture)?)
        .map_err(|e| format!("Invalid fixture {}: {e}", fixture.display()))?;
    let remote = seed_remote(records)?;
    let local = JsonFileStore::open(state, app)?;

    let mut config = SyncConfig::new(app);
    for partition in partitions {
        config = config.with_partition(partition.as_str());
    }
    if shared {
        config = config.with_scopes([DatabaseScope::Private, DatabaseScope::Shared]);
    }

    let sync = SyncCoordinator::new(config, remote, local, MemoryCache::new());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(async {
        let result = sync.on_launch().await;
        sync.join_resumed_operations().await;
        result
    });

    let report = report(&sync, result);
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => print_text_output(&report),
    }

    Ok(())
}

/// Builds a remote store holding the fixture records.
pub fn seed_remote(records: Vec<FixtureRecord>) -> Result<MemoryRemoteStore, Box<dyn std::error::Error>> {
    let remote = MemoryRemoteStore::new();
    for fixture in records {
        if let Some(scope) = fixture.scope {
            remote.add_partition(scope, fixture.partition.as_str());
        }
        let id = RecordId::new(fixture.partition.as_str(), fixture.name);
        let mut record = RemoteRecord::new(fixture.record_type, id)?;
        for (name, value) in fixture.fields {
            record.set(name, value);
        }
        remote.save_record(record)?;
    }
    Ok(remote)
}

fn report(
    sync: &SyncCoordinator<MemoryRemoteStore, JsonFileStore, MemoryCache>,
    result: FetchResult,
) -> SyncReport {
    let stats = sync.stats();
    let records = sync
        .delegate()
        .records()
        .into_iter()
        .map(|record| CachedRecord {
            record_type: record.record_type,
            id: record.id.to_string(),
            fields: record.fields,
        })
        .collect();
    SyncReport {
        result,
        records_changed: stats.records_changed,
        records_deleted: stats.records_deleted,
        cursors: sync.local().cursor_count(),
        error: stats.last_error,
        records,
    }
}

fn print_text_output(report: &SyncReport) {
    let result = match report.result {
        FetchResult::NewData => "new data",
        FetchResult::NoData => "no data",
        FetchResult::Failed => "failed",
    };
    println!("Result:          {result}");
    println!("Records changed: {}", report.records_changed);
    println!("Records deleted: {}", report.records_deleted);
    println!("Cursors stored:  {}", report.cursors);
    if let Some(error) = &report.error {
        println!("Error:           {error}");
    }
    if report.records.is_empty() {
        return;
    }
    println!();
    println!("{:<16} {:<32} Fields", "Type", "Id");
    for record in &report.records {
        let fields: Vec<&str> = record.fields.keys().map(String::as_str).collect();
        println!("{:<16} {:<32} {}", record.record_type, record.id, fields.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudcache_engine::LocalStore;
    use cloudcache_protocol::CursorScope;
    use tempfile::tempdir;

    const FIXTURE: &str = r#"[
        {"record_type": "Note", "partition": "inbox", "name": "n1",
         "fields": {"title": {"type": "text", "value": "hello"}}},
        {"record_type": "Note", "partition": "inbox", "name": "n2"},
        {"record_type": "Note", "partition": "friends", "name": "s1", "scope": "shared"}
    ]"#;

    fn coordinator(
        state: &Path,
        shared: bool,
    ) -> SyncCoordinator<MemoryRemoteStore, JsonFileStore, MemoryCache> {
        let records: Vec<FixtureRecord> = serde_json::from_str(FIXTURE).unwrap();
        let remote = seed_remote(records).unwrap();
        let local = JsonFileStore::open(state, "notes").unwrap();
        let mut config = SyncConfig::new("notes");
        if shared {
            config = config.with_scopes([DatabaseScope::Private, DatabaseScope::Shared]);
        }
        SyncCoordinator::new(config, remote, local, MemoryCache::new())
    }

    #[tokio::test]
    async fn fixture_is_cached_and_state_persisted() {
        let dir = tempdir().unwrap();
        let state = dir.path().join("state.json");

        let sync = coordinator(&state, true);
        assert_eq!(sync.on_launch().await, FetchResult::NewData);

        let report = report(&sync, FetchResult::NewData);
        assert_eq!(report.records.len(), 3);
        assert_eq!(report.records[1].id, "inbox/n1");
        assert!(report.records[1].fields.contains_key("title"));
        assert!(sync
            .local()
            .get_cursor(&CursorScope::Database(DatabaseScope::Shared))
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn second_run_with_the_same_state_has_nothing_new() {
        let dir = tempdir().unwrap();
        let state = dir.path().join("state.json");

        let first = coordinator(&state, false);
        assert_eq!(first.on_launch().await, FetchResult::NewData);
        drop(first);

        let second = coordinator(&state, false);
        assert_eq!(second.on_launch().await, FetchResult::NoData);
        assert_eq!(second.remote().subscription_creates(), 0);
        assert!(second.delegate().is_empty());
    }
}
