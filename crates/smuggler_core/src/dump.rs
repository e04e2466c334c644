//! Dump file format.
//!
//! A full dump is a top-level JSON array of documents. An incremental dump
//! is an object with both streams:
//!
//! ```json
//! {
//!   "Docs": [ { "Name": "...", "@metadata": { "@id": "users/1", "@etag": "..." } } ],
//!   "DocsDeletions": [ { "Key": "users/2", "Etag": "..." } ]
//! }
//! ```
//!
//! Every document carries its source etag in `@metadata`; the reader accepts
//! either shape for any file. Files in a dump directory are named after the
//! UTC time they were started (`yyyy-MM-dd-HH-mm-ss-fff`) with a
//! `.full-dump` or `.incremental-dump` extension, and are written under a
//! `.tmp` name until finished. `Smuggler.manifest.json` in the same
//! directory lists the last etags of every finished file so an importer can
//! decide to skip a file without parsing it.

use crate::error::{SmugglerError, SmugglerResult};
use crate::etag::{Etag, EtagPair};
use crate::files::{commit_rename, temp_path_for, write_atomic, TEMP_SUFFIX};
use crate::store::{DocumentRecord, METADATA_KEY, META_ETAG, META_ID, META_LAST_MODIFIED};
use crate::tombstones::Tombstone;

pub use crate::files::DIRECTORY_LOCK_FILE;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Extension of full dump files.
pub const FULL_DUMP_EXTENSION: &str = "full-dump";
/// Extension of incremental dump files.
pub const INCREMENTAL_DUMP_EXTENSION: &str = "incremental-dump";
/// Name of the per-directory manifest.
pub const MANIFEST_FILE: &str = "Smuggler.manifest.json";

const DOCS_FIELD: &str = "Docs";
const DELETIONS_FIELD: &str = "DocsDeletions";
const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S-%3f";

/// Kind of dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DumpKind {
    /// The whole keyspace from the beginning.
    Full,
    /// Changes since the previous export into the same directory.
    Incremental,
}

impl DumpKind {
    /// File extension for this kind.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Full => FULL_DUMP_EXTENSION,
            Self::Incremental => INCREMENTAL_DUMP_EXTENSION,
        }
    }

    /// Infers the kind from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            FULL_DUMP_EXTENSION => Some(Self::Full),
            INCREMENTAL_DUMP_EXTENSION => Some(Self::Incremental),
            _ => None,
        }
    }
}

/// Builds the file name for a dump started at `started`.
pub fn dump_file_name(kind: DumpKind, started: DateTime<Utc>) -> String {
    format!(
        "{}.{}",
        started.format(FILE_TIMESTAMP_FORMAT),
        kind.extension()
    )
}

/// Lists the finished dump files in `dir`, oldest first.
///
/// Files are ordered by last modification time, then by name. Temporary
/// files and anything without a dump extension are ignored.
pub fn list_dump_files(dir: &Path) -> SmugglerResult<Vec<PathBuf>> {
    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() || DumpKind::from_path(&path).is_none() {
            continue;
        }
        let modified = entry
            .metadata()?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((modified, path));
    }
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// A deletion entry in an incremental dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionEntry {
    /// Deleted key.
    #[serde(rename = "Key")]
    pub key: String,
    /// Source etag of the deletion.
    #[serde(rename = "Etag")]
    pub etag: Etag,
}

impl From<&Tombstone> for DeletionEntry {
    fn from(tombstone: &Tombstone) -> Self {
        Self {
            key: tombstone.key.clone(),
            etag: tombstone.etag,
        }
    }
}

/// A document as read from a dump.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpDocument {
    /// Document key, from `@metadata.@id`.
    pub key: String,
    /// Source etag, from `@metadata.@etag`.
    pub etag: Etag,
    /// Document body without `@metadata`.
    pub body: Value,
    /// Metadata to carry to the target. Source-assigned fields are removed.
    pub metadata: Map<String, Value>,
}

impl DumpDocument {
    /// Serializes a store record into its dump form.
    pub fn encode(record: &DocumentRecord) -> SmugglerResult<Value> {
        let Value::Object(mut body) = record.payload.clone() else {
            return Err(SmugglerError::Serialization(format!(
                "document '{}' body is not a JSON object",
                record.key
            )));
        };
        let mut metadata = record.metadata.clone();
        metadata.insert(META_ID.to_string(), Value::String(record.key.clone()));
        metadata.insert(META_ETAG.to_string(), Value::String(record.etag.to_string()));
        body.insert(METADATA_KEY.to_string(), Value::Object(metadata));
        Ok(Value::Object(body))
    }

    /// Parses a document from its dump form.
    pub fn decode(value: Value) -> SmugglerResult<Self> {
        let Value::Object(mut body) = value else {
            return Err(SmugglerError::corrupt_input("document is not a JSON object"));
        };
        let Some(Value::Object(mut metadata)) = body.remove(METADATA_KEY) else {
            return Err(SmugglerError::corrupt_input(format!(
                "document is missing its {METADATA_KEY} object"
            )));
        };
        let key = match metadata.remove(META_ID) {
            Some(Value::String(key)) if !key.is_empty() => key,
            _ => {
                return Err(SmugglerError::corrupt_input(format!(
                    "document metadata has no {META_ID}"
                )))
            }
        };
        let etag = match metadata.remove(META_ETAG) {
            Some(Value::String(text)) => Etag::parse(&text).map_err(|e| {
                SmugglerError::corrupt_input(format!("document '{key}': {e}"))
            })?,
            _ => {
                return Err(SmugglerError::corrupt_input(format!(
                    "document '{key}' metadata has no {META_ETAG}"
                )))
            }
        };
        metadata.remove(META_LAST_MODIFIED);
        Ok(Self {
            key,
            etag,
            body: Value::Object(body),
            metadata,
        })
    }
}

/// Parsed contents of one dump file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DumpContents {
    /// Documents in file order.
    pub documents: Vec<DumpDocument>,
    /// Deletions in file order.
    pub deletions: Vec<DeletionEntry>,
}

impl DumpContents {
    /// Highest etag in each stream, `Etag::EMPTY` for an empty stream.
    pub fn max_etags(&self) -> EtagPair {
        EtagPair::new(
            self.documents
                .iter()
                .map(|d| d.etag)
                .max()
                .unwrap_or(Etag::EMPTY),
            self.deletions
                .iter()
                .map(|d| d.etag)
                .max()
                .unwrap_or(Etag::EMPTY),
        )
    }

    /// Iterates over every item in the order it was written.
    pub fn items(&self) -> impl Iterator<Item = DumpItem<'_>> {
        self.documents
            .iter()
            .map(DumpItem::Document)
            .chain(self.deletions.iter().map(DumpItem::Deletion))
    }
}

/// One entry of a dump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DumpItem<'a> {
    /// A document.
    Document(&'a DumpDocument),
    /// A deletion.
    Deletion(&'a DeletionEntry),
}

/// Reads and validates a dump file of either shape.
pub fn read_dump(path: &Path) -> SmugglerResult<DumpContents> {
    let file = File::open(path)?;
    let value: Value = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| SmugglerError::corrupt_file(path, e.to_string()))?;
    parse_dump(value).map_err(|e| e.in_file(path))
}

/// Parses a dump already loaded as JSON.
pub fn parse_dump(value: Value) -> SmugglerResult<DumpContents> {
    let (documents, deletions) = match value {
        Value::Array(documents) => (documents, Vec::new()),
        Value::Object(mut root) => {
            let documents = match root.remove(DOCS_FIELD) {
                Some(Value::Array(documents)) => documents,
                None | Some(Value::Null) => Vec::new(),
                Some(_) => {
                    return Err(SmugglerError::corrupt_input(format!(
                        "'{DOCS_FIELD}' is not an array"
                    )))
                }
            };
            let deletions = match root.remove(DELETIONS_FIELD) {
                Some(Value::Array(deletions)) => deletions,
                None | Some(Value::Null) => Vec::new(),
                Some(_) => {
                    return Err(SmugglerError::corrupt_input(format!(
                        "'{DELETIONS_FIELD}' is not an array"
                    )))
                }
            };
            (documents, deletions)
        }
        _ => {
            return Err(SmugglerError::corrupt_input(
                "dump is neither a document array nor an incremental object",
            ))
        }
    };

    let documents = documents
        .into_iter()
        .map(DumpDocument::decode)
        .collect::<SmugglerResult<Vec<_>>>()?;
    let deletions = deletions
        .into_iter()
        .map(|value| {
            serde_json::from_value::<DeletionEntry>(value)
                .map_err(|e| SmugglerError::corrupt_input(format!("deletion entry: {e}")))
        })
        .collect::<SmugglerResult<Vec<_>>>()?;

    Ok(DumpContents {
        documents,
        deletions,
    })
}

/// What a finished dump contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpSummary {
    /// Final path of the file.
    pub path: PathBuf,
    /// Kind of dump.
    pub kind: DumpKind,
    /// Number of documents written.
    pub documents: usize,
    /// Number of deletions written.
    pub deletions: usize,
    /// Last etag written in each stream, `Etag::EMPTY` for an empty stream.
    pub last_etags: EtagPair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Documents,
    Deletions,
}

/// Streams a dump to a temporary file and renames it into place on finish.
///
/// Each stream must be written in strictly increasing etag order.
#[derive(Debug)]
pub struct DumpWriter {
    kind: DumpKind,
    path: PathBuf,
    temp_path: PathBuf,
    out: BufWriter<File>,
    section: Section,
    items_in_section: usize,
    documents: usize,
    deletions: usize,
    last: EtagPair,
}

impl DumpWriter {
    /// Starts a new dump in `dir`, named after `started`.
    ///
    /// If a file with that name already exists the timestamp is moved
    /// forward a millisecond at a time until the name is free.
    pub fn create_in(dir: &Path, kind: DumpKind, started: DateTime<Utc>) -> SmugglerResult<Self> {
        fs::create_dir_all(dir)?;
        let mut at = started;
        loop {
            let path = dir.join(dump_file_name(kind, at));
            if !path.exists() && !temp_path_for(&path).exists() {
                return Self::create(path, kind);
            }
            at += Duration::milliseconds(1);
        }
    }

    /// Starts a new dump that will be written to `path`.
    pub fn create(path: PathBuf, kind: DumpKind) -> SmugglerResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let temp_path = temp_path_for(&path);
        let mut out = BufWriter::new(File::create(&temp_path)?);
        match kind {
            DumpKind::Full => out.write_all(b"[")?,
            DumpKind::Incremental => write!(out, "{{\"{DOCS_FIELD}\":[")?,
        }
        Ok(Self {
            kind,
            path,
            temp_path,
            out,
            section: Section::Documents,
            items_in_section: 0,
            documents: 0,
            deletions: 0,
            last: EtagPair::EMPTY,
        })
    }

    /// Final path the dump is renamed to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of documents written so far.
    pub fn documents_written(&self) -> usize {
        self.documents
    }

    /// Returns the number of deletions written so far.
    pub fn deletions_written(&self) -> usize {
        self.deletions
    }

    /// Appends a document. Documents must come before deletions.
    pub fn write_document(&mut self, record: &DocumentRecord) -> SmugglerResult<()> {
        if self.section != Section::Documents {
            return Err(SmugglerError::Serialization(
                "documents cannot follow deletions".to_string(),
            ));
        }
        if self.documents > 0 && record.etag <= self.last.documents {
            return Err(SmugglerError::Serialization(format!(
                "document etag {} does not follow {}",
                record.etag, self.last.documents
            )));
        }
        let value = DumpDocument::encode(record)?;
        self.separator()?;
        serde_json::to_writer(&mut self.out, &value)
            .map_err(|e| SmugglerError::Serialization(e.to_string()))?;
        self.documents += 1;
        self.last.documents = record.etag;
        Ok(())
    }

    /// Appends a deletion. Only incremental dumps carry deletions.
    pub fn write_deletion(&mut self, tombstone: &Tombstone) -> SmugglerResult<()> {
        if self.kind != DumpKind::Incremental {
            return Err(SmugglerError::invalid_options(
                "full dumps do not carry deletions",
            ));
        }
        if self.section == Section::Documents {
            write!(self.out, "],\"{DELETIONS_FIELD}\":[")?;
            self.section = Section::Deletions;
            self.items_in_section = 0;
        }
        if self.deletions > 0 && tombstone.etag <= self.last.deletions {
            return Err(SmugglerError::Serialization(format!(
                "deletion etag {} does not follow {}",
                tombstone.etag, self.last.deletions
            )));
        }
        self.separator()?;
        serde_json::to_writer(&mut self.out, &DeletionEntry::from(tombstone))
            .map_err(|e| SmugglerError::Serialization(e.to_string()))?;
        self.deletions += 1;
        self.last.deletions = tombstone.etag;
        Ok(())
    }

    fn separator(&mut self) -> SmugglerResult<()> {
        if self.items_in_section > 0 {
            self.out.write_all(b",")?;
        }
        self.items_in_section += 1;
        Ok(())
    }

    /// Closes the JSON, syncs the file and renames it into place.
    pub fn finish(mut self) -> SmugglerResult<DumpSummary> {
        match (self.kind, self.section) {
            (DumpKind::Full, _) => self.out.write_all(b"]")?,
            (DumpKind::Incremental, Section::Documents) => {
                write!(self.out, "],\"{DELETIONS_FIELD}\":[]}}")?
            }
            (DumpKind::Incremental, Section::Deletions) => self.out.write_all(b"]}")?,
        }
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        commit_rename(&self.temp_path, &self.path)?;
        Ok(DumpSummary {
            path: self.path.clone(),
            kind: self.kind,
            documents: self.documents,
            deletions: self.deletions,
            last_etags: self.last,
        })
    }

    /// Drops the partial dump.
    pub fn abandon(self) {
        let temp_path = self.temp_path.clone();
        drop(self);
        if let Err(err) = fs::remove_file(&temp_path) {
            tracing::warn!(path = %temp_path.display(), error = %err, "failed to remove partial dump");
        }
    }
}

/// One finished file in a dump directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestEntry {
    /// File name within the directory.
    pub file_name: String,
    /// Kind of dump.
    pub kind: DumpKind,
    /// Last document etag in the file.
    pub last_doc_etag: Etag,
    /// Last deletion etag in the file.
    pub last_doc_delete_etag: Etag,
    /// Number of documents in the file.
    pub documents: usize,
    /// Number of deletions in the file.
    pub deletions: usize,
}

impl ManifestEntry {
    /// Builds an entry for a finished dump.
    pub fn from_summary(summary: &DumpSummary) -> Self {
        Self {
            file_name: summary
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            kind: summary.kind,
            last_doc_etag: summary.last_etags.documents,
            last_doc_delete_etag: summary.last_etags.deletions,
            documents: summary.documents,
            deletions: summary.deletions,
        }
    }

    /// Highest etag in each stream of the file.
    pub fn max_etags(&self) -> EtagPair {
        EtagPair::new(self.last_doc_etag, self.last_doc_delete_etag)
    }
}

/// Index of finished files in a dump directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DumpManifest {
    /// Entries in the order the files were finished.
    pub files: Vec<ManifestEntry>,
}

impl DumpManifest {
    /// Loads the manifest of `dir`. A missing manifest is empty.
    pub fn load(dir: &Path) -> SmugglerResult<Self> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read(&path)?;
        serde_json::from_slice(&data).map_err(|e| SmugglerError::corrupt_file(&path, e.to_string()))
    }

    /// Atomically writes the manifest to `dir`.
    pub fn save(&self, dir: &Path) -> SmugglerResult<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| SmugglerError::Serialization(e.to_string()))?;
        write_atomic(&dir.join(MANIFEST_FILE), &data)
    }

    /// Adds or replaces the entry for a file.
    pub fn record(&mut self, entry: ManifestEntry) {
        self.files.retain(|e| e.file_name != entry.file_name);
        self.files.push(entry);
    }

    /// Returns the entry for `file_name`.
    pub fn entry(&self, file_name: &str) -> Option<&ManifestEntry> {
        self.files.iter().find(|e| e.file_name == file_name)
    }
}

/// Returns true if `path` names a temporary dump.
pub fn is_temporary(path: &Path) -> bool {
    path.to_string_lossy().ends_with(TEMP_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, MemoryStore};
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    fn seeded_store(count: usize) -> MemoryStore {
        let store = MemoryStore::new("Source");
        for i in 1..=count {
            store
                .put(&format!("users/{i}"), json!({"Name": format!("user{i}")}), Map::new())
                .unwrap();
        }
        store
    }

    #[test]
    fn file_name_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap() + Duration::milliseconds(42);
        assert_eq!(
            dump_file_name(DumpKind::Incremental, at),
            "2024-03-09-14-05-07-042.incremental-dump"
        );
        assert_eq!(
            DumpKind::from_path(Path::new("x/2024-03-09-14-05-07-042.full-dump")),
            Some(DumpKind::Full)
        );
        assert_eq!(DumpKind::from_path(Path::new("x/a.full-dump.tmp")), None);
    }

    #[test]
    fn full_dump_is_top_level_array() {
        let dir = tempdir().unwrap();
        let store = seeded_store(3);

        let mut writer = DumpWriter::create(dir.path().join("out.full-dump"), DumpKind::Full).unwrap();
        for record in store.read_documents_since(Etag::EMPTY, 10).unwrap() {
            writer.write_document(&record).unwrap();
        }
        let summary = writer.finish().unwrap();
        assert_eq!(summary.documents, 3);

        let raw: Value = serde_json::from_slice(&fs::read(&summary.path).unwrap()).unwrap();
        let docs = raw.as_array().unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0]["@metadata"]["@id"], json!("users/1"));
        assert_eq!(docs[0]["Name"], json!("user1"));

        let contents = read_dump(&summary.path).unwrap();
        assert_eq!(contents.documents[2].key, "users/3");
        assert_eq!(contents.max_etags().documents, summary.last_etags.documents);
        assert!(contents.documents[0].metadata.get(META_ETAG).is_none());
    }

    #[test]
    fn incremental_dump_carries_both_streams() {
        let dir = tempdir().unwrap();
        let store = seeded_store(3);
        store.delete_if_exists("users/2").unwrap();

        let mut writer =
            DumpWriter::create_in(dir.path(), DumpKind::Incremental, Utc::now()).unwrap();
        for record in store.read_documents_since(Etag::EMPTY, 10).unwrap() {
            writer.write_document(&record).unwrap();
        }
        for tombstone in store.read_tombstones(Etag::EMPTY, None, 10).unwrap() {
            writer.write_deletion(&tombstone).unwrap();
        }
        let summary = writer.finish().unwrap();

        let raw: Value = serde_json::from_slice(&fs::read(&summary.path).unwrap()).unwrap();
        assert_eq!(raw["Docs"].as_array().unwrap().len(), 2);
        assert_eq!(raw["DocsDeletions"][0]["Key"], json!("users/2"));

        let contents = read_dump(&summary.path).unwrap();
        assert_eq!(contents.deletions.len(), 1);
        assert_eq!(contents.items().count(), 3);
    }

    #[test]
    fn empty_incremental_dump_is_valid_json() {
        let dir = tempdir().unwrap();
        let writer = DumpWriter::create(dir.path().join("a.incremental-dump"), DumpKind::Incremental)
            .unwrap();
        let summary = writer.finish().unwrap();
        let contents = read_dump(&summary.path).unwrap();
        assert_eq!(contents, DumpContents::default());
        assert_eq!(summary.last_etags, EtagPair::EMPTY);
    }

    #[test]
    fn writer_rejects_out_of_order_etags() {
        let dir = tempdir().unwrap();
        let store = seeded_store(2);
        let records = store.read_documents_since(Etag::EMPTY, 10).unwrap();

        let mut writer = DumpWriter::create(dir.path().join("a.full-dump"), DumpKind::Full).unwrap();
        writer.write_document(&records[1]).unwrap();
        assert!(writer.write_document(&records[0]).is_err());
        writer.abandon();
        assert!(!dir.path().join("a.full-dump.tmp").exists());
    }

    #[test]
    fn full_dump_refuses_deletions() {
        let dir = tempdir().unwrap();
        let store = seeded_store(1);
        store.delete_if_exists("users/1").unwrap();
        let tombstone = &store.read_tombstones(Etag::EMPTY, None, 1).unwrap()[0];

        let mut writer = DumpWriter::create(dir.path().join("a.full-dump"), DumpKind::Full).unwrap();
        assert!(writer.write_deletion(tombstone).is_err());
    }

    #[test]
    fn create_in_avoids_name_collisions() {
        let dir = tempdir().unwrap();
        let at = Utc::now();
        let first = DumpWriter::create_in(dir.path(), DumpKind::Incremental, at)
            .unwrap()
            .finish()
            .unwrap();
        let second = DumpWriter::create_in(dir.path(), DumpKind::Incremental, at)
            .unwrap()
            .finish()
            .unwrap();
        assert_ne!(first.path, second.path);
        assert!(second.path > first.path);
    }

    #[test]
    fn corrupt_input_names_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.incremental-dump");

        fs::write(&path, b"{\"Docs\": [").unwrap();
        let err = read_dump(&path).unwrap_err();
        assert!(matches!(err, SmugglerError::CorruptInput { path: Some(_), .. }));

        fs::write(&path, br#"[{"Name": "no metadata"}]"#).unwrap();
        let err = read_dump(&path).unwrap_err();
        assert!(err.to_string().contains("bad.incremental-dump"));

        fs::write(&path, br#"{"DocsDeletions": [{"Key": "a", "Etag": "zz"}]}"#).unwrap();
        assert!(matches!(
            read_dump(&path),
            Err(SmugglerError::CorruptInput { .. })
        ));
    }

    #[test]
    fn manifest_round_trip_and_replace() {
        let dir = tempdir().unwrap();
        assert!(DumpManifest::load(dir.path()).unwrap().files.is_empty());

        let mut manifest = DumpManifest::default();
        let entry = ManifestEntry {
            file_name: "a.incremental-dump".to_string(),
            kind: DumpKind::Incremental,
            last_doc_etag: Etag::new(1, 10),
            last_doc_delete_etag: Etag::EMPTY,
            documents: 10,
            deletions: 0,
        };
        manifest.record(entry.clone());
        manifest.record(entry.clone());
        manifest.save(dir.path()).unwrap();

        let loaded = DumpManifest::load(dir.path()).unwrap();
        assert_eq!(loaded.files.len(), 1);
        assert_eq!(
            loaded.entry("a.incremental-dump").unwrap().max_etags(),
            EtagPair::new(Etag::new(1, 10), Etag::EMPTY)
        );
    }

    #[test]
    fn listing_ignores_temporary_and_foreign_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("2024-01-01-00-00-00-000.full-dump"), b"[]").unwrap();
        fs::write(dir.path().join("2024-01-01-00-00-01-000.incremental-dump"), b"{}").unwrap();
        fs::write(dir.path().join("2024-01-01-00-00-02-000.incremental-dump.tmp"), b"{").unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), b"{}").unwrap();

        let files = list_dump_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|p| !is_temporary(p)));
    }
}
