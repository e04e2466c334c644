//! Continuation tracking for resumable imports.
//!
//! A continuation token names one logical transfer. For each token the
//! tracker remembers, per dump file, how far into the document and deletion
//! streams the importer has applied, and whether the whole file is done.
//! Replaying the same directory with the same token then skips completed
//! files without opening them and resumes partially applied ones.
//!
//! Progress is persisted before the importer moves on. A crash between
//! applying a batch and recording it re-applies that batch on resume; the
//! importer's writes are idempotent, so this never loses or duplicates data.

use crate::error::{SmugglerError, SmugglerResult};
use crate::etag::EtagPair;
use crate::files::write_atomic;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How far one file has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileProgress {
    /// Highest source etags applied from the file.
    pub applied_through: EtagPair,
    /// True once every item in the file has been applied.
    pub complete: bool,
}

/// Everything recorded for one continuation token.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContinuationRecord {
    /// The token.
    pub token: String,
    /// Progress keyed by file identity.
    pub files: BTreeMap<String, FileProgress>,
}

impl ContinuationRecord {
    /// Creates an empty record for `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            files: BTreeMap::new(),
        }
    }
}

/// Persistence for continuation records.
pub trait ContinuationStore: Send + Sync {
    /// Loads the record for `token`, if one exists.
    fn load(&self, token: &str) -> SmugglerResult<Option<ContinuationRecord>>;

    /// Durably replaces the record for `record.token`.
    fn save(&self, record: &ContinuationRecord) -> SmugglerResult<()>;
}

/// Continuation records that live as long as the process.
#[derive(Debug, Default)]
pub struct MemoryContinuationStore {
    records: RwLock<HashMap<String, ContinuationRecord>>,
}

impl MemoryContinuationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContinuationStore for MemoryContinuationStore {
    fn load(&self, token: &str) -> SmugglerResult<Option<ContinuationRecord>> {
        Ok(self.records.read().get(token).cloned())
    }

    fn save(&self, record: &ContinuationRecord) -> SmugglerResult<()> {
        self.records
            .write()
            .insert(record.token.clone(), record.clone());
        Ok(())
    }
}

/// Continuation records stored as one CBOR file per token.
#[derive(Debug, Clone)]
pub struct DirectoryContinuationStore {
    root: PathBuf,
}

impl DirectoryContinuationStore {
    /// Uses `root` for record files, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> SmugglerResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the directory holding the records.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a token to its record file.
    ///
    /// Lowercase ASCII letters, digits and `-` are kept; every other byte is
    /// written as `_` plus two hex digits, so distinct tokens never share a
    /// file, even on case-insensitive file systems.
    fn record_path(&self, token: &str) -> PathBuf {
        let mut file_name = String::with_capacity(token.len());
        for byte in token.bytes() {
            if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' {
                file_name.push(char::from(byte));
            } else {
                file_name.push_str(&format!("_{byte:02x}"));
            }
        }
        self.root.join(format!("{file_name}.continuation"))
    }
}

impl ContinuationStore for DirectoryContinuationStore {
    fn load(&self, token: &str) -> SmugglerResult<Option<ContinuationRecord>> {
        let path = self.record_path(token);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        let record: ContinuationRecord = ciborium::from_reader(Cursor::new(&data))
            .map_err(|e| SmugglerError::corrupt_file(&path, e.to_string()))?;
        if record.token != token {
            return Err(SmugglerError::state_unavailable(format!(
                "continuation file {} belongs to token '{}'",
                path.display(),
                record.token
            )));
        }
        Ok(Some(record))
    }

    fn save(&self, record: &ContinuationRecord) -> SmugglerResult<()> {
        let mut data = Vec::new();
        ciborium::into_writer(record, &mut data)
            .map_err(|e| SmugglerError::Serialization(e.to_string()))?;
        write_atomic(&self.record_path(&record.token), &data)
    }
}

/// Decides what an import may skip and records what it applied.
pub struct ContinuationTracker {
    backend: Arc<dyn ContinuationStore>,
    cache: Mutex<HashMap<String, ContinuationRecord>>,
}

impl std::fmt::Debug for ContinuationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuationTracker")
            .field("cached_tokens", &self.cache.lock().len())
            .finish()
    }
}

impl ContinuationTracker {
    /// Creates a tracker over `backend`.
    pub fn new(backend: Arc<dyn ContinuationStore>) -> Self {
        Self {
            backend,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a tracker that keeps records in memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryContinuationStore::new()))
    }

    fn with_record<T>(
        &self,
        token: &str,
        f: impl FnOnce(&mut ContinuationRecord) -> T,
    ) -> SmugglerResult<T> {
        let mut cache = self.cache.lock();
        if !cache.contains_key(token) {
            let record = self
                .backend
                .load(token)?
                .unwrap_or_else(|| ContinuationRecord::new(token));
            cache.insert(token.to_string(), record);
        }
        match cache.get_mut(token) {
            Some(record) => Ok(f(record)),
            None => Err(SmugglerError::state_unavailable(format!(
                "continuation '{token}' could not be loaded"
            ))),
        }
    }

    /// Returns true if `file` was completely applied under `token` up to at
    /// least `max_in_file`.
    pub fn should_skip(
        &self,
        token: &str,
        file: &str,
        max_in_file: &EtagPair,
    ) -> SmugglerResult<bool> {
        self.with_record(token, |record| {
            record
                .files
                .get(file)
                .is_some_and(|p| p.complete && p.applied_through.covers(max_in_file))
        })
    }

    /// Returns the recorded progress for `file`, if any.
    pub fn progress(&self, token: &str, file: &str) -> SmugglerResult<Option<FileProgress>> {
        self.with_record(token, |record| record.files.get(file).copied())
    }

    /// Records that items up to `applied_through` were applied from `file`.
    pub fn record_progress(
        &self,
        token: &str,
        file: &str,
        applied_through: EtagPair,
    ) -> SmugglerResult<()> {
        self.update(token, file, applied_through, false)
    }

    /// Records that `file` was applied completely up to `applied_through`.
    pub fn record_applied(
        &self,
        token: &str,
        file: &str,
        applied_through: EtagPair,
    ) -> SmugglerResult<()> {
        self.update(token, file, applied_through, true)
    }

    fn update(
        &self,
        token: &str,
        file: &str,
        applied_through: EtagPair,
        complete: bool,
    ) -> SmugglerResult<()> {
        let saved = self.with_record(token, |record| {
            let entry = record.files.entry(file.to_string()).or_default();
            entry.applied_through = entry.applied_through.max(applied_through);
            entry.complete |= complete;
            self.backend.save(record)
        })?;
        if saved.is_err() {
            // Forget the unsaved update; the next call reloads from the backend.
            self.cache.lock().remove(token);
        }
        saved
    }
}
