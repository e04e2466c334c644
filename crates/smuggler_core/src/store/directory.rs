//! Directory-backed reference store.
//!
//! ```text
//! <database>/
//! ├─ LOCK          # Advisory lock held while the store is open
//! └─ store.json    # Snapshot: restart counter, documents, tombstones
//! ```
//!
//! The store lives in memory and is written back on [`DocumentStore::flush`]
//! and when dropped. Every open bumps the restart counter, so etags issued
//! after a restart sort after everything issued before it.

use super::{DocumentRecord, DocumentStore, MemoryStore, MemoryStoreConfig};
use crate::error::{SmugglerError, SmugglerResult};
use crate::etag::Etag;
use crate::files::write_atomic;
use crate::tombstones::Tombstone;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

const LOCK_FILE: &str = "LOCK";
const SNAPSHOT_FILE: &str = "store.json";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StoreSnapshot {
    restarts: u64,
    documents: Vec<DocumentRecord>,
    tombstones: Vec<Tombstone>,
}

/// A [`MemoryStore`] persisted to a locked directory.
#[derive(Debug)]
pub struct DirectoryStore {
    path: PathBuf,
    store: MemoryStore,
    dirty: AtomicBool,
    _lock_file: File,
}

impl DirectoryStore {
    /// Creates a new, empty store directory and opens it.
    ///
    /// Fails if the directory already holds a store.
    pub fn create(path: &Path, config: MemoryStoreConfig) -> SmugglerResult<Self> {
        if path.join(SNAPSHOT_FILE).exists() {
            return Err(SmugglerError::invalid_options(format!(
                "a store already exists at {}",
                path.display()
            )));
        }
        fs::create_dir_all(path)?;
        let lock_file = Self::lock(path)?;
        let snapshot = serde_json::to_vec_pretty(&StoreSnapshot::default())
            .map_err(|e| SmugglerError::Serialization(e.to_string()))?;
        write_atomic(&path.join(SNAPSHOT_FILE), &snapshot)?;
        drop(lock_file);

        Self::open(path, config)
    }

    /// Opens an existing store directory.
    ///
    /// # Errors
    ///
    /// - `DatabaseNotFound` if the directory or its snapshot is missing
    /// - `Connectivity` if another process holds the lock
    /// - `CorruptInput` if the snapshot cannot be parsed
    pub fn open(path: &Path, config: MemoryStoreConfig) -> SmugglerResult<Self> {
        let snapshot_path = path.join(SNAPSHOT_FILE);
        if !path.is_dir() || !snapshot_path.is_file() {
            return Err(Self::not_found(path));
        }

        let lock_file = Self::lock(path)?;

        let data = fs::read(&snapshot_path)?;
        let mut snapshot: StoreSnapshot = serde_json::from_slice(&data)
            .map_err(|e| SmugglerError::corrupt_file(&snapshot_path, e.to_string()))?;
        snapshot.restarts = snapshot.restarts.saturating_add(1).max(config.restarts);

        let name = database_name(path);
        let config = config.with_restarts(snapshot.restarts);
        let store = MemoryStore::restore(
            name,
            config,
            std::mem::take(&mut snapshot.documents),
            std::mem::take(&mut snapshot.tombstones),
        );

        let opened = Self {
            path: path.to_path_buf(),
            store,
            dirty: AtomicBool::new(true),
            _lock_file: lock_file,
        };
        opened.flush()?;
        tracing::debug!(
            path = %path.display(),
            restarts = snapshot.restarts,
            "opened directory store"
        );
        Ok(opened)
    }

    /// Returns true if `path` holds a store.
    pub fn exists(path: &Path) -> bool {
        path.join(SNAPSHOT_FILE).is_file()
    }

    fn lock(path: &Path) -> SmugglerResult<File> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(SmugglerError::connectivity(
                path.display().to_string(),
                "database is locked by another process",
            ));
        }
        Ok(lock_file)
    }

    fn not_found(path: &Path) -> SmugglerError {
        let server = path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        SmugglerError::database_not_found(database_name(path), server)
    }

    /// Returns the store directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the underlying in-memory store.
    pub fn memory(&self) -> &MemoryStore {
        &self.store
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

fn database_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl DocumentStore for DirectoryStore {
    fn name(&self) -> &str {
        self.store.name()
    }

    fn read_documents_since(
        &self,
        after: Etag,
        limit: usize,
    ) -> SmugglerResult<Vec<DocumentRecord>> {
        self.store.read_documents_since(after, limit)
    }

    fn last_document_etag(&self) -> SmugglerResult<Etag> {
        self.store.last_document_etag()
    }

    fn read_tombstones(
        &self,
        after: Etag,
        up_to: Option<Etag>,
        limit: usize,
    ) -> SmugglerResult<Vec<Tombstone>> {
        self.store.read_tombstones(after, up_to, limit)
    }

    fn last_tombstone_etag(&self) -> SmugglerResult<Etag> {
        self.store.last_tombstone_etag()
    }

    fn put(&self, key: &str, payload: Value, metadata: Map<String, Value>) -> SmugglerResult<Etag> {
        let etag = self.store.put(key, payload, metadata)?;
        self.mark_dirty();
        Ok(etag)
    }

    fn delete_if_exists(&self, key: &str) -> SmugglerResult<bool> {
        let deleted = self.store.delete_if_exists(key)?;
        if deleted {
            self.mark_dirty();
        }
        Ok(deleted)
    }

    fn purge_tombstones(&self, cutoff: Etag) -> SmugglerResult<usize> {
        let purged = self.store.purge_tombstones(cutoff)?;
        if purged > 0 {
            self.mark_dirty();
        }
        Ok(purged)
    }

    fn get(&self, key: &str) -> SmugglerResult<Option<DocumentRecord>> {
        self.store.get(key)
    }

    fn document_count(&self) -> SmugglerResult<usize> {
        self.store.document_count()
    }

    fn max_batch_size(&self) -> usize {
        self.store.max_batch_size()
    }

    fn flush(&self) -> SmugglerResult<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let (documents, tombstones) = self.store.snapshot();
        let snapshot = StoreSnapshot {
            restarts: self.store.config().restarts,
            documents,
            tombstones,
        };
        let data = serde_json::to_vec(&snapshot)
            .map_err(|e| SmugglerError::Serialization(e.to_string()))?;
        if let Err(err) = write_atomic(&self.path.join(SNAPSHOT_FILE), &data) {
            self.mark_dirty();
            return Err(err);
        }
        Ok(())
    }
}

impl Drop for DirectoryStore {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to flush store on close");
        }
    }
}
