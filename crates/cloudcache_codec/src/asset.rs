//! Local blob cache with orphan garbage collection.
//!
//! Blobs of one record type live in their own directory under a common root.
//! A blob's filename embeds the id of the record owning it
//! (`<id>-<uuid>.bin`), which is what `delete_all` and `reconcile` match on.
//! They match on `<id>-` anywhere in the name, so `rec1` never claims the
//! blobs of `rec10`.

use crate::codec::{ASSET_FIELD_PREFIX, ASSET_FILENAME_FIELD};
use crate::error::{AssetError, AssetResult};
use cloudcache_protocol::{FieldValue, RemoteRecord};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Extension of generated blob files.
pub const ASSET_EXTENSION: &str = "bin";

/// Blob directory of one record type.
#[derive(Debug, Clone)]
pub struct AssetStore {
    record_type: String,
    dir: PathBuf,
}

impl AssetStore {
    /// Opens the directory for `record_type` under `root`, creating it if needed.
    pub fn open(root: impl AsRef<Path>, record_type: &str) -> AssetResult<Self> {
        check_name(record_type)?;
        let dir = root.as_ref().join(record_type);
        fs::create_dir_all(&dir).map_err(|e| AssetError::io(&dir, e))?;
        Ok(Self {
            record_type: record_type.to_string(),
            dir,
        })
    }

    /// Record type served by this store.
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Directory holding the blobs.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of a blob.
    pub fn path_of(&self, filename: &str) -> AssetResult<PathBuf> {
        check_name(filename)?;
        Ok(self.dir.join(filename))
    }

    /// Writes a new blob for the record `id` and returns its generated filename.
    pub fn put(&self, id: &str, data: &[u8]) -> AssetResult<String> {
        check_name(id)?;
        let filename = format!("{id}-{}.{ASSET_EXTENSION}", Uuid::new_v4().simple());
        self.write_named(&filename, data)?;
        Ok(filename)
    }

    /// Writes a blob under an existing filename, e.g. one received from the remote store.
    pub fn write_named(&self, filename: &str, data: &[u8]) -> AssetResult<()> {
        let path = self.path_of(filename)?;
        fs::write(&path, data).map_err(|e| AssetError::io(&path, e))?;
        debug!(record_type = %self.record_type, %filename, bytes = data.len(), "blob written");
        Ok(())
    }

    /// Reads a blob. Returns `None` if it does not exist.
    pub fn get(&self, filename: &str) -> AssetResult<Option<Vec<u8>>> {
        let path = self.path_of(filename)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AssetError::io(&path, e)),
        }
    }

    /// Returns true if the blob exists.
    pub fn contains(&self, filename: &str) -> bool {
        self.path_of(filename)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Lists every blob filename, sorted.
    pub fn filenames(&self) -> AssetResult<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| AssetError::io(&self.dir, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AssetError::io(&self.dir, e))?;
            if entry.path().is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Deletes one blob. Returns false if it did not exist.
    pub fn delete(&self, filename: &str) -> AssetResult<bool> {
        let path = self.path_of(filename)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AssetError::io(&path, e)),
        }
    }

    /// Deletes every blob whose filename contains `<id>-`, for a deleted record.
    pub fn delete_all(&self, id: &str) -> AssetResult<Vec<String>> {
        check_name(id)?;
        let mut deleted = Vec::new();
        for name in self.filenames()? {
            if owned_by(&name, id) && self.delete(&name)? {
                deleted.push(name);
            }
        }
        if !deleted.is_empty() {
            debug!(record_type = %self.record_type, %id, count = deleted.len(), "blobs of deleted record removed");
        }
        Ok(deleted)
    }

    /// Deletes blobs of `record` that the record no longer references.
    ///
    /// The referenced set is taken from the record's asset fields and its
    /// `assetFilename` field. Returns the deleted filenames.
    pub fn reconcile(&self, record: &RemoteRecord) -> AssetResult<Vec<String>> {
        let keep = referenced_filenames(record);
        let id = record.id.name.as_str();
        let mut deleted = Vec::new();
        for name in self.filenames()? {
            if owned_by(&name, id) && !keep.contains(&name) && self.delete(&name)? {
                deleted.push(name);
            }
        }
        if !deleted.is_empty() {
            debug!(record_type = %self.record_type, %id, count = deleted.len(), "orphaned blobs removed");
        }
        Ok(deleted)
    }
}

/// Filenames a record references through its asset fields.
pub fn referenced_filenames(record: &RemoteRecord) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for (field, value) in &record.fields {
        match value {
            FieldValue::Asset(asset) if field.starts_with(ASSET_FIELD_PREFIX) => {
                names.insert(asset.filename.clone());
            }
            FieldValue::Text(name) if field == ASSET_FILENAME_FIELD => {
                names.insert(name.clone());
            }
            _ => {}
        }
    }
    names
}

fn owned_by(filename: &str, id: &str) -> bool {
    filename.contains(&format!("{id}-"))
}

fn check_name(name: &str) -> AssetResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        Err(AssetError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudcache_protocol::{Asset, RecordId};
    use tempfile::TempDir;

    fn store() -> (TempDir, AssetStore) {
        let dir = TempDir::new().unwrap();
        let store = AssetStore::open(dir.path(), "Photo").unwrap();
        (dir, store)
    }

    #[test]
    fn open_creates_type_directory() {
        let (root, store) = store();
        assert!(root.path().join("Photo").is_dir());
        assert_eq!(store.record_type(), "Photo");
    }

    #[test]
    fn put_get_delete() {
        let (_root, store) = store();
        let name = store.put("rec1", b"pixels").unwrap();
        assert!(name.starts_with("rec1-"));
        assert!(name.ends_with(".bin"));
        assert!(store.contains(&name));
        assert_eq!(store.get(&name).unwrap(), Some(b"pixels".to_vec()));

        assert!(store.delete(&name).unwrap());
        assert!(!store.delete(&name).unwrap());
        assert_eq!(store.get(&name).unwrap(), None);
    }

    #[test]
    fn put_generates_distinct_names() {
        let (_root, store) = store();
        let a = store.put("rec1", b"1").unwrap();
        let b = store.put("rec1", b"2").unwrap();
        assert_ne!(a, b);
        assert_eq!(store.filenames().unwrap().len(), 2);
    }

    #[test]
    fn traversal_is_rejected() {
        let (_root, store) = store();
        for name in ["../escape.bin", "a/b.bin", "..", ""] {
            assert!(matches!(
                store.write_named(name, b"x"),
                Err(AssetError::InvalidName(_))
            ));
        }
        assert!(!store.contains("../Photo"));
    }

    #[test]
    fn delete_all_only_touches_matching_id() {
        let (_root, store) = store();
        store.put("rec1", b"1").unwrap();
        store.put("rec1", b"2").unwrap();
        let other = store.put("rec2", b"3").unwrap();

        let deleted = store.delete_all("rec1").unwrap();
        assert_eq!(deleted.len(), 2);
        assert_eq!(store.filenames().unwrap(), vec![other]);
    }

    #[test]
    fn delete_all_leaves_ids_sharing_a_prefix() {
        let (_root, store) = store();
        let short = store.put("rec1", b"1").unwrap();
        let long = store.put("rec10", b"2").unwrap();

        assert_eq!(store.delete_all("rec1").unwrap(), vec![short]);
        assert_eq!(store.filenames().unwrap(), vec![long]);
    }

    #[test]
    fn reconcile_leaves_ids_sharing_a_prefix() {
        let (_root, store) = store();
        let stale = store.put("rec1", b"old").unwrap();
        let other = store.put("rec10", b"other").unwrap();
        let record = RemoteRecord::new("Photo", RecordId::new("p", "rec1")).unwrap();

        assert_eq!(store.reconcile(&record).unwrap(), vec![stale]);
        assert_eq!(store.filenames().unwrap(), vec![other]);
    }

    #[test]
    fn referenced_filenames_reads_both_fields() {
        let mut record = RemoteRecord::new("Photo", RecordId::new("p", "rec1")).unwrap();
        record.set(
            "AssetFilename_Photo",
            FieldValue::Asset(Asset {
                filename: "rec1-a.bin".into(),
                data: vec![1],
            }),
        );
        record.set("assetFilename", FieldValue::Text("rec1-b.bin".into()));
        record.set("caption", FieldValue::Text("rec1-c.bin".into()));

        let names = referenced_filenames(&record);
        assert_eq!(names.len(), 2);
        assert!(names.contains("rec1-a.bin"));
        assert!(names.contains("rec1-b.bin"));
    }
}
