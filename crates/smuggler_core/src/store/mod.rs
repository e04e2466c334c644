//! Store collaborators.
//!
//! The migration engine never talks to a storage engine directly. It reads
//! and writes through [`DocumentStore`], which exposes the etag-ordered
//! document stream, the tombstone ledger and idempotent write operations.
//!
//! Two reference implementations are provided:
//! - [`MemoryStore`]: volatile, used by tests and the in-process server
//! - [`DirectoryStore`]: a memory store persisted to a locked directory

mod directory;
mod memory;

pub use directory::DirectoryStore;
pub use memory::{MemoryStore, MemoryStoreConfig};

use crate::error::SmugglerResult;
use crate::etag::Etag;
use crate::tombstones::Tombstone;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the metadata object embedded in every exported document.
pub const METADATA_KEY: &str = "@metadata";
/// Metadata field holding the document key.
pub const META_ID: &str = "@id";
/// Metadata field holding the document's source etag.
pub const META_ETAG: &str = "@etag";
/// Metadata field holding the last write time.
pub const META_LAST_MODIFIED: &str = "@last-modified";
/// Metadata field holding the document's collection.
pub const META_COLLECTION: &str = "@collection";

/// A committed document version.
///
/// Records are immutable: a later write to the same key produces a new
/// record with a higher etag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Document key.
    pub key: String,
    /// Etag the store assigned to this version.
    pub etag: Etag,
    /// Document body.
    pub payload: Value,
    /// Metadata stamped by the store.
    pub metadata: Map<String, Value>,
}

impl DocumentRecord {
    /// Returns the collection named in the metadata, if any.
    pub fn collection(&self) -> Option<&str> {
        self.metadata.get(META_COLLECTION).and_then(Value::as_str)
    }
}

/// Read/write surface of a document store as seen by the migration engine.
///
/// Implementations must be safe to read while other threads write. Every
/// write receives an etag greater than all etags the store issued before it,
/// and documents and tombstones draw from the same etag sequence.
pub trait DocumentStore: Send + Sync {
    /// Database name.
    fn name(&self) -> &str;

    /// Returns up to `limit` current documents with etag greater than
    /// `after`, in ascending etag order.
    fn read_documents_since(&self, after: Etag, limit: usize)
        -> SmugglerResult<Vec<DocumentRecord>>;

    /// Returns the high-water etag of the document stream.
    fn last_document_etag(&self) -> SmugglerResult<Etag>;

    /// Returns up to `limit` tombstones with `after < etag <= up_to`, ascending.
    fn read_tombstones(
        &self,
        after: Etag,
        up_to: Option<Etag>,
        limit: usize,
    ) -> SmugglerResult<Vec<Tombstone>>;

    /// Returns the high-water etag of the tombstone stream.
    fn last_tombstone_etag(&self) -> SmugglerResult<Etag>;

    /// Writes a document by key and returns the etag the store assigned.
    ///
    /// Writing a key clears any pending tombstone for it.
    fn put(&self, key: &str, payload: Value, metadata: Map<String, Value>) -> SmugglerResult<Etag>;

    /// Deletes a document if it exists, recording a tombstone.
    ///
    /// Returns false, and records nothing, if the key is absent.
    fn delete_if_exists(&self, key: &str) -> SmugglerResult<bool>;

    /// Removes tombstones with etag `<= cutoff`. Returns how many were removed.
    fn purge_tombstones(&self, cutoff: Etag) -> SmugglerResult<usize>;

    /// Returns the current version of a document.
    fn get(&self, key: &str) -> SmugglerResult<Option<DocumentRecord>>;

    /// Returns the number of live documents.
    fn document_count(&self) -> SmugglerResult<usize>;

    /// Server-enforced batch ceiling.
    fn max_batch_size(&self) -> usize;

    /// Makes applied writes durable.
    fn flush(&self) -> SmugglerResult<()> {
        Ok(())
    }
}
