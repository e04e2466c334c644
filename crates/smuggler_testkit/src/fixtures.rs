//! Test fixtures and store helpers.

use serde_json::{json, Map, Value};
use smuggler_core::{DocumentStore, Etag, MemoryStore, MemoryStoreConfig};
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Key of the `i`th user document.
pub fn user_key(i: usize) -> String {
    format!("users/{i}")
}

/// Body of the `i`th user document.
pub fn user_doc(i: usize) -> Value {
    json!({ "Name": format!("user{i}"), "Age": 20 + (i % 50) })
}

/// Creates a memory store named `name`.
pub fn memory_store(name: &str) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(name))
}

/// Creates a memory store with a server batch ceiling.
pub fn capped_store(name: &str, max_batch_size: usize) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_config(
        name,
        MemoryStoreConfig::new().with_max_batch_size(max_batch_size),
    ))
}

/// Writes user documents `range` and returns their etags in order.
pub fn put_users(store: &MemoryStore, range: RangeInclusive<usize>) -> Vec<Etag> {
    range
        .map(|i| {
            store
                .put(&user_key(i), user_doc(i), Map::new())
                .expect("put user")
        })
        .collect()
}

/// Creates a store holding users `1..=count`.
pub fn seeded_store(name: &str, count: usize) -> Arc<MemoryStore> {
    let store = memory_store(name);
    if count > 0 {
        put_users(&store, 1..=count);
    }
    store
}

/// Deletes user `i` and returns the tombstone's etag.
pub fn delete_user(store: &MemoryStore, i: usize) -> Etag {
    assert!(
        store.delete_if_exists(&user_key(i)).expect("delete user"),
        "users/{i} did not exist"
    );
    store.last_tombstone_etag().expect("tombstone etag")
}

/// A temporary dump directory, removed on drop.
pub struct TestDumpDir {
    dir: TempDir,
}

impl TestDumpDir {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Default for TestDumpDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_store_has_increasing_etags() {
        let store = memory_store("s");
        let etags = put_users(&store, 1..=5);
        assert!(etags.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(store.document_count().unwrap(), 5);
    }

    #[test]
    fn delete_user_returns_tombstone_etag() {
        let store = seeded_store("s", 2);
        let etag = delete_user(&store, 1);
        assert_eq!(store.tombstones().get("users/1").unwrap().etag, etag);
    }
}
