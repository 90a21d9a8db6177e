//! Assets command implementation.

use cloudcache_codec::AssetStore;
use std::path::Path;

/// Lists the cached blobs of a record type.
pub fn list(root: &Path, record_type: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = AssetStore::open(root, record_type)?;
    let names = store.filenames()?;

    println!("Blob cache: {}", store.dir().display());
    if names.is_empty() {
        println!("  (empty)");
        return Ok(());
    }
    let mut total = 0u64;
    for name in &names {
        let size = std::fs::metadata(store.path_of(name)?)?.len();
        total += size;
        println!("  {name:<56} {size:>10} bytes");
    }
    println!("{} blob(s), {} bytes", names.len(), total);
    Ok(())
}

/// Deletes every cached blob of one record.
pub fn purge(root: &Path, record_type: &str, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    if id.is_empty() {
        return Err("Record name must not be empty".into());
    }
    let store = AssetStore::open(root, record_type)?;
    let deleted = store.delete_all(id)?;
    for name in &deleted {
        println!("Deleted {name}");
    }
    println!("{} blob(s) purged", deleted.len());
    Ok(())
}
