//! In-memory reference store.

use super::{DocumentRecord, DocumentStore, META_ETAG, META_ID, META_LAST_MODIFIED};
use crate::error::SmugglerResult;
use crate::etag::Etag;
use crate::tombstones::{Tombstone, TombstoneLedger};
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

/// Configuration for a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Server-enforced batch ceiling.
    pub max_batch_size: usize,
    /// Restart counter stamped into every etag this instance issues.
    pub restarts: u64,
}

impl MemoryStoreConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            max_batch_size: 1024,
            restarts: 1,
        }
    }

    /// Sets the server-enforced batch ceiling.
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets the restart counter.
    #[must_use]
    pub fn with_restarts(mut self, restarts: u64) -> Self {
        self.restarts = restarts;
        self
    }
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct Documents {
    by_key: HashMap<String, DocumentRecord>,
    by_etag: BTreeMap<Etag, String>,
    /// Last etag issued to a document or a tombstone.
    last_issued: Etag,
}

impl Documents {
    fn issue(&mut self, restarts: u64) -> Etag {
        let etag = if self.last_issued.restarts() >= restarts {
            self.last_issued.next()
        } else {
            Etag::new(restarts, 1)
        };
        self.last_issued = etag;
        etag
    }
}

/// Volatile document store with a tombstone ledger.
///
/// Etags are issued under the document lock, so a reader that observes
/// etag `e` as the high-water mark also observes every write at or below `e`.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    config: MemoryStoreConfig,
    documents: RwLock<Documents>,
    tombstones: TombstoneLedger,
}

impl MemoryStore {
    /// Creates an empty store with the default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, MemoryStoreConfig::default())
    }

    /// Creates an empty store.
    pub fn with_config(name: impl Into<String>, config: MemoryStoreConfig) -> Self {
        Self {
            name: name.into(),
            config,
            documents: RwLock::new(Documents::default()),
            tombstones: TombstoneLedger::new(),
        }
    }

    /// Rebuilds a store from previously captured documents and tombstones.
    ///
    /// Etags keep their captured values. New writes are issued under
    /// `config.restarts` when it exceeds every captured restart counter, and
    /// continue the captured sequence otherwise.
    pub fn restore(
        name: impl Into<String>,
        config: MemoryStoreConfig,
        documents: Vec<DocumentRecord>,
        tombstones: Vec<Tombstone>,
    ) -> Self {
        let mut state = Documents::default();
        for record in documents {
            state.last_issued = state.last_issued.max(record.etag);
            state.by_etag.insert(record.etag, record.key.clone());
            state.by_key.insert(record.key.clone(), record);
        }
        for tombstone in &tombstones {
            state.last_issued = state.last_issued.max(tombstone.etag);
        }
        Self {
            name: name.into(),
            config,
            documents: RwLock::new(state),
            tombstones: TombstoneLedger::from_tombstones(tombstones),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &MemoryStoreConfig {
        &self.config
    }

    /// Returns the tombstone ledger.
    pub fn tombstones(&self) -> &TombstoneLedger {
        &self.tombstones
    }

    /// Returns every live document in etag order.
    pub fn snapshot_documents(&self) -> Vec<DocumentRecord> {
        let documents = self.documents.read();
        documents
            .by_etag
            .values()
            .filter_map(|key| documents.by_key.get(key).cloned())
            .collect()
    }

    /// Returns every live document and every tombstone, captured together
    /// so no key appears in both.
    pub fn snapshot(&self) -> (Vec<DocumentRecord>, Vec<Tombstone>) {
        let documents = self.documents.read();
        let live = documents
            .by_etag
            .values()
            .filter_map(|key| documents.by_key.get(key).cloned())
            .collect();
        (live, self.tombstones.snapshot())
    }

    /// Returns the last etag issued to anything in this store.
    pub fn last_issued_etag(&self) -> Etag {
        self.documents.read().last_issued
    }
}

impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_documents_since(
        &self,
        after: Etag,
        limit: usize,
    ) -> SmugglerResult<Vec<DocumentRecord>> {
        let documents = self.documents.read();
        Ok(documents
            .by_etag
            .range((Bound::Excluded(after), Bound::Unbounded))
            .take(limit)
            .filter_map(|(_, key)| documents.by_key.get(key).cloned())
            .collect())
    }

    fn last_document_etag(&self) -> SmugglerResult<Etag> {
        Ok(self
            .documents
            .read()
            .by_etag
            .keys()
            .next_back()
            .copied()
            .unwrap_or(Etag::EMPTY))
    }

    fn read_tombstones(
        &self,
        after: Etag,
        up_to: Option<Etag>,
        limit: usize,
    ) -> SmugglerResult<Vec<Tombstone>> {
        Ok(self.tombstones.range_between(after, up_to, limit))
    }

    fn last_tombstone_etag(&self) -> SmugglerResult<Etag> {
        Ok(self.tombstones.last_etag())
    }

    fn put(&self, key: &str, payload: Value, metadata: Map<String, Value>) -> SmugglerResult<Etag> {
        let mut documents = self.documents.write();
        let etag = documents.issue(self.config.restarts);

        let mut metadata = metadata;
        metadata.insert(META_ID.to_string(), Value::String(key.to_string()));
        metadata.insert(META_ETAG.to_string(), Value::String(etag.to_string()));
        metadata.insert(
            META_LAST_MODIFIED.to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );

        let record = DocumentRecord {
            key: key.to_string(),
            etag,
            payload,
            metadata,
        };
        if let Some(previous) = documents.by_key.insert(key.to_string(), record) {
            documents.by_etag.remove(&previous.etag);
        }
        documents.by_etag.insert(etag, key.to_string());
        self.tombstones.clear(key);
        Ok(etag)
    }

    fn delete_if_exists(&self, key: &str) -> SmugglerResult<bool> {
        let mut documents = self.documents.write();
        let Some(previous) = documents.by_key.remove(key) else {
            return Ok(false);
        };
        documents.by_etag.remove(&previous.etag);
        let etag = documents.issue(self.config.restarts);
        self.tombstones.record(key, etag, previous.collection());
        Ok(true)
    }

    fn purge_tombstones(&self, cutoff: Etag) -> SmugglerResult<usize> {
        Ok(self.tombstones.purge_up_to(cutoff))
    }

    fn get(&self, key: &str) -> SmugglerResult<Option<DocumentRecord>> {
        Ok(self.documents.read().by_key.get(key).cloned())
    }

    fn document_count(&self) -> SmugglerResult<usize> {
        Ok(self.documents.read().by_key.len())
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::META_COLLECTION;
    use serde_json::json;

    fn put(store: &MemoryStore, key: &str) -> Etag {
        store.put(key, json!({"Name": key}), Map::new()).unwrap()
    }

    #[test]
    fn put_stamps_metadata_and_increasing_etags() {
        let store = MemoryStore::new("Source");
        let first = put(&store, "users/1");
        let second = put(&store, "users/2");
        assert!(second > first);
        assert_eq!(first, Etag::new(1, 1));

        let record = store.get("users/1").unwrap().unwrap();
        assert_eq!(record.metadata[META_ID], json!("users/1"));
        assert_eq!(record.metadata[META_ETAG], json!(first.to_string()));
        assert!(record.metadata.contains_key(META_LAST_MODIFIED));
    }

    #[test]
    fn overwrite_moves_document_to_new_etag() {
        let store = MemoryStore::new("Source");
        put(&store, "users/1");
        put(&store, "users/2");
        let rewritten = put(&store, "users/1");

        let keys: Vec<_> = store
            .read_documents_since(Etag::EMPTY, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["users/2", "users/1"]);
        assert_eq!(store.last_document_etag().unwrap(), rewritten);
        assert_eq!(store.document_count().unwrap(), 2);
    }

    #[test]
    fn read_documents_since_is_exclusive() {
        let store = MemoryStore::new("Source");
        let etags: Vec<_> = (1..=5).map(|i| put(&store, &format!("users/{i}"))).collect();

        let page = store.read_documents_since(etags[1], 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].etag, etags[2]);
        assert_eq!(page[1].etag, etags[3]);
    }

    #[test]
    fn delete_records_tombstone_and_put_clears_it() {
        let store = MemoryStore::new("Source");
        let mut metadata = Map::new();
        metadata.insert(META_COLLECTION.to_string(), json!("Users"));
        let put_etag = store.put("users/1", json!({}), metadata).unwrap();

        assert!(store.delete_if_exists("users/1").unwrap());
        assert!(!store.delete_if_exists("users/1").unwrap());

        let tombstones = store.read_tombstones(Etag::EMPTY, None, 10).unwrap();
        assert_eq!(tombstones.len(), 1);
        assert!(tombstones[0].etag > put_etag);
        assert_eq!(tombstones[0].collection.as_deref(), Some("Users"));

        put(&store, "users/1");
        assert!(store.read_tombstones(Etag::EMPTY, None, 10).unwrap().is_empty());
    }

    #[test]
    fn restore_continues_after_captured_etags() {
        let store = MemoryStore::new("Source");
        put(&store, "users/1");
        put(&store, "users/2");
        store.delete_if_exists("users/2").unwrap();

        let restored = MemoryStore::restore(
            "Source",
            MemoryStoreConfig::new().with_restarts(2),
            store.snapshot_documents(),
            store.tombstones().snapshot(),
        );
        let etag = put(&restored, "users/3");
        assert_eq!(etag, Etag::new(2, 1));
        assert!(etag > store.last_issued_etag());
        assert_eq!(restored.document_count().unwrap(), 2);
        assert_eq!(restored.tombstones().len(), 1);
    }
}
