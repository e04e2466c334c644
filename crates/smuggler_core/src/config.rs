//! Options for export, import and periodic export.

use crate::connection::ConnectionOptions;
use crate::error::{SmugglerError, SmugglerResult};
use crate::etag::{Etag, EtagPair};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where an export writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportDestination {
    /// A single full dump file.
    File(PathBuf),
    /// A dump directory holding dated dump files and the export state.
    Directory(PathBuf),
}

impl ExportDestination {
    /// Picks the destination kind for `path`.
    ///
    /// Incremental exports always target a directory. Full exports target a
    /// directory when `path` is an existing directory, a file otherwise.
    pub fn from_path(path: impl Into<PathBuf>, incremental: bool) -> Self {
        let path = path.into();
        if incremental || path.is_dir() {
            Self::Directory(path)
        } else {
            Self::File(path)
        }
    }

    /// Returns the destination path.
    pub fn path(&self) -> &Path {
        match self {
            Self::File(path) | Self::Directory(path) => path,
        }
    }
}

/// Where an import reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    /// A single dump file.
    File(PathBuf),
    /// A dump directory, applied file by file in creation order.
    Directory(PathBuf),
}

impl ImportSource {
    /// Picks the source kind for an existing `path`.
    ///
    /// Directories can only be imported incrementally.
    pub fn from_path(path: impl Into<PathBuf>, incremental: bool) -> SmugglerResult<Self> {
        let path = path.into();
        if path.is_dir() {
            if incremental {
                Ok(Self::Directory(path))
            } else {
                Err(SmugglerError::invalid_options(format!(
                    "{} is a directory; directories can only be imported incrementally",
                    path.display()
                )))
            }
        } else if path.is_file() {
            Ok(Self::File(path))
        } else {
            Err(SmugglerError::invalid_options(format!(
                "{} does not exist",
                path.display()
            )))
        }
    }

    /// Returns the source path.
    pub fn path(&self) -> &Path {
        match self {
            Self::File(path) | Self::Directory(path) => path,
        }
    }
}

/// Options for one export run.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Where to write.
    pub destination: ExportDestination,
    /// Export only changes since the state recorded in the destination.
    pub incremental: bool,
    /// Requested batch size; the source's ceiling still applies.
    pub batch_size: Option<usize>,
    /// Lower bounds overriding the recorded state.
    pub start_etags: Option<EtagPair>,
    /// Inclusive upper bound of the document stream.
    pub max_etag: Option<Etag>,
    /// Inclusive upper bound of the deletion stream.
    pub max_deletion_etag: Option<Etag>,
}

impl ExportOptions {
    /// Creates options for a full export.
    pub fn new(destination: ExportDestination) -> Self {
        Self {
            destination,
            incremental: false,
            batch_size: None,
            start_etags: None,
            max_etag: None,
            max_deletion_etag: None,
        }
    }

    /// Creates options for an incremental export into `dir`.
    pub fn incremental(dir: impl Into<PathBuf>) -> Self {
        Self::new(ExportDestination::Directory(dir.into())).with_incremental(true)
    }

    /// Sets incremental mode.
    #[must_use]
    pub fn with_incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    /// Sets the requested batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Starts after `etags` instead of the recorded state.
    #[must_use]
    pub fn with_start_etags(mut self, etags: EtagPair) -> Self {
        self.start_etags = Some(etags);
        self
    }

    /// Stops the document stream at `etag`, inclusive.
    #[must_use]
    pub fn with_max_etag(mut self, etag: Etag) -> Self {
        self.max_etag = Some(etag);
        self
    }

    /// Stops the deletion stream at `etag`, inclusive.
    #[must_use]
    pub fn with_max_deletion_etag(mut self, etag: Etag) -> Self {
        self.max_deletion_etag = Some(etag);
        self
    }

    /// Rejects unsupported combinations.
    pub fn validate(&self) -> SmugglerResult<()> {
        if self.incremental {
            if let ExportDestination::File(path) = &self.destination {
                return Err(SmugglerError::invalid_options(format!(
                    "incremental export needs a directory, got file {}",
                    path.display()
                )));
            }
        }
        if self.batch_size == Some(0) {
            return Err(SmugglerError::invalid_options("batch size must be positive"));
        }
        Ok(())
    }
}

/// Options for one import run.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// What to read.
    pub source: ImportSource,
    /// Apply a directory of incremental dumps.
    pub incremental: bool,
    /// Requested batch size; the target's ceiling still applies.
    pub batch_size: Option<usize>,
    /// Token under which progress is recorded and resumed.
    pub continuation_token: Option<String>,
    /// Source store whose tombstones are purged after a successful import.
    pub purge_source: Option<ConnectionOptions>,
}

impl ImportOptions {
    /// Creates options for importing `source`.
    pub fn new(source: ImportSource) -> Self {
        let incremental = matches!(source, ImportSource::Directory(_));
        Self {
            source,
            incremental,
            batch_size: None,
            continuation_token: None,
            purge_source: None,
        }
    }

    /// Sets the requested batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Sets the continuation token.
    #[must_use]
    pub fn with_continuation_token(mut self, token: impl Into<String>) -> Self {
        self.continuation_token = Some(token.into());
        self
    }

    /// Purges consumed tombstones from `source` after a successful import.
    #[must_use]
    pub fn with_purge_source(mut self, source: ConnectionOptions) -> Self {
        self.purge_source = Some(source);
        self
    }

    /// Rejects unsupported combinations.
    pub fn validate(&self) -> SmugglerResult<()> {
        if let ImportSource::Directory(path) = &self.source {
            if !self.incremental {
                return Err(SmugglerError::invalid_options(format!(
                    "{} is a directory; directories can only be imported incrementally",
                    path.display()
                )));
            }
        }
        if self.batch_size == Some(0) {
            return Err(SmugglerError::invalid_options("batch size must be positive"));
        }
        Ok(())
    }
}

/// Periodic export settings, as stored by operators.
///
/// ```json
/// { "LocalFolderName": "/backups/db", "IntervalMilliseconds": 60000,
///   "FullBackupIntervalMilliseconds": 86400000, "BatchSize": 512 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeriodicExportSetup {
    /// Dump directory.
    pub local_folder_name: PathBuf,
    /// Incremental interval. Absent disables incremental runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_milliseconds: Option<u64>,
    /// Full backup interval. Absent disables full runs after the first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_backup_interval_milliseconds: Option<u64>,
    /// Requested batch size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

impl PeriodicExportSetup {
    /// Creates a setup writing into `folder` with no intervals.
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            local_folder_name: folder.into(),
            interval_milliseconds: None,
            full_backup_interval_milliseconds: None,
            batch_size: None,
        }
    }

    /// Sets the incremental interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_milliseconds = Some(duration_millis(interval));
        self
    }

    /// Sets the full backup interval.
    #[must_use]
    pub fn with_full_backup_interval(mut self, interval: Duration) -> Self {
        self.full_backup_interval_milliseconds = Some(duration_millis(interval));
        self
    }

    /// Sets the requested batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Incremental interval.
    pub fn interval(&self) -> Option<Duration> {
        self.interval_milliseconds
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Full backup interval.
    pub fn full_backup_interval(&self) -> Option<Duration> {
        self.full_backup_interval_milliseconds
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// How often the scheduler should wake up: the shorter configured interval.
    pub fn tick_interval(&self) -> Option<Duration> {
        match (self.interval(), self.full_backup_interval()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Parses a setup from JSON.
    pub fn from_json(data: &[u8]) -> SmugglerResult<Self> {
        let setup: Self = serde_json::from_slice(data)
            .map_err(|e| SmugglerError::corrupt_input(format!("periodic export setup: {e}")))?;
        setup.validate()?;
        Ok(setup)
    }

    /// Loads a setup from a JSON file.
    pub fn load(path: &Path) -> SmugglerResult<Self> {
        let data = fs::read(path)?;
        Self::from_json(&data).map_err(|e| e.in_file(path))
    }

    /// Rejects setups that would never export anything.
    pub fn validate(&self) -> SmugglerResult<()> {
        if self.local_folder_name.as_os_str().is_empty() {
            return Err(SmugglerError::invalid_options(
                "periodic export needs a LocalFolderName",
            ));
        }
        if self.tick_interval().is_none() {
            return Err(SmugglerError::invalid_options(
                "periodic export needs IntervalMilliseconds or FullBackupIntervalMilliseconds",
            ));
        }
        Ok(())
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
