//! Incremental export state.
//!
//! Each dump directory holds `IncrementalExport.state.json`, which records
//! where the last incremental export stopped in both streams:
//!
//! ```json
//! { "LastDocEtag": "...", "LastDocDeleteEtag": "...", "LastAttachmentsEtag": "..." }
//! ```
//!
//! Older exporters wrote `LastDocEtag` only. Such files load with the
//! deletion position at `Etag::EMPTY`.

use crate::error::{SmugglerError, SmugglerResult};
use crate::etag::{Etag, EtagPair};
use crate::files::write_atomic;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the state file inside a dump directory.
pub const STATE_FILE: &str = "IncrementalExport.state.json";

/// Where the last export into a directory stopped.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OperationState {
    /// Last document etag written.
    pub last_doc_etag: Etag,
    /// Last deletion etag written.
    #[serde(default)]
    pub last_doc_delete_etag: Etag,
    /// Last attachment etag written, carried for older readers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attachments_etag: Option<Etag>,
    /// File the last export produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StoredState {
    last_doc_etag: Etag,
    last_doc_delete_etag: Option<Etag>,
    last_attachments_etag: Option<Etag>,
    file_path: Option<PathBuf>,
}

/// A state file as loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedState {
    /// The state.
    pub state: OperationState,
    /// True if the file predates deletion tracking.
    pub legacy: bool,
}

impl OperationState {
    /// Creates a state from both stream positions.
    pub fn new(last_etags: EtagPair) -> Self {
        Self {
            last_doc_etag: last_etags.documents,
            last_doc_delete_etag: last_etags.deletions,
            last_attachments_etag: None,
            file_path: None,
        }
    }

    /// Sets the file the export produced.
    #[must_use]
    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Both stream positions.
    pub fn last_etags(&self) -> EtagPair {
        EtagPair::new(self.last_doc_etag, self.last_doc_delete_etag)
    }

    /// Returns the state file path for a dump directory.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(STATE_FILE)
    }

    /// Loads the state of `dir`, or `None` if nothing was exported there yet.
    pub fn load(dir: &Path) -> SmugglerResult<Option<LoadedState>> {
        let path = Self::path_in(dir);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        Self::parse(&data)
            .map(Some)
            .map_err(|e| e.in_file(&path))
    }

    /// Parses state file contents.
    pub fn parse(data: &[u8]) -> SmugglerResult<LoadedState> {
        let stored: StoredState = serde_json::from_slice(data)
            .map_err(|e| SmugglerError::corrupt_input(format!("state file: {e}")))?;
        let legacy = stored.last_doc_delete_etag.is_none();
        Ok(LoadedState {
            state: OperationState {
                last_doc_etag: stored.last_doc_etag,
                last_doc_delete_etag: stored.last_doc_delete_etag.unwrap_or(Etag::EMPTY),
                last_attachments_etag: stored.last_attachments_etag,
                file_path: stored.file_path,
            },
            legacy,
        })
    }

    /// Atomically writes the state into `dir`.
    pub fn save(&self, dir: &Path) -> SmugglerResult<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| SmugglerError::Serialization(e.to_string()))?;
        write_atomic(&Self::path_in(dir), &data)
    }
}
