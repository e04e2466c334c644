//! Crash-safe file helpers shared by every on-disk artifact.
//!
//! All state the engine persists (operation state, dump manifests,
//! continuation records, periodic status, store snapshots) goes through
//! [`write_atomic`]:
//!
//! 1. Write to `<name>.tmp`
//! 2. Sync the temporary file
//! 3. Rename it over the target
//! 4. Sync the parent directory so the rename is durable

use crate::error::{SmugglerError, SmugglerResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Suffix used for files that are still being written.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Advisory lock file held in a dump directory while a run writes to it.
pub const DIRECTORY_LOCK_FILE: &str = "Smuggler.lock";

/// Exclusive advisory lock on a dump directory, released on drop.
///
/// Held for a whole export so separate pipelines and processes cannot
/// write overlapping dumps into the same directory.
#[derive(Debug)]
pub struct DirectoryLock {
    _file: File,
}

impl DirectoryLock {
    /// Creates `dir` if needed and locks it without blocking.
    ///
    /// Fails with `Busy` if another holder has the lock.
    pub fn acquire(dir: &Path) -> SmugglerResult<Self> {
        fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(DIRECTORY_LOCK_FILE))?;
        if file.try_lock_exclusive().is_err() {
            return Err(SmugglerError::busy(dir.display().to_string()));
        }
        Ok(Self { _file: file })
    }
}

/// Returns the temporary path used while `path` is being written.
#[must_use]
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

/// Replaces `path` with `data` using write-then-rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> SmugglerResult<()> {
    let temp_path = temp_path_for(path);

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    if let Some(parent) = path.parent() {
        sync_directory(parent)?;
    }
    Ok(())
}

/// Renames a finished temporary file into place and syncs its directory.
pub fn commit_rename(from: &Path, to: &Path) -> SmugglerResult<()> {
    fs::rename(from, to)?;
    if let Some(parent) = to.parent() {
        sync_directory(parent)?;
    }
    Ok(())
}

/// Syncs a directory so created, renamed or removed entries are durable.
///
/// NTFS journals metadata, so this is a no-op off Unix.
#[cfg(unix)]
pub fn sync_directory(path: &Path) -> SmugglerResult<()> {
    let path = if path.as_os_str().is_empty() {
        Path::new(".")
    } else {
        path
    };
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub fn sync_directory(_path: &Path) -> SmugglerResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_atomic_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn directory_lock_excludes_second_holder() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("dumps");

        let lock = DirectoryLock::acquire(&target).unwrap();
        assert!(matches!(
            DirectoryLock::acquire(&target),
            Err(SmugglerError::Busy { .. })
        ));

        drop(lock);
        assert!(DirectoryLock::acquire(&target).is_ok());
    }

    #[test]
    fn temp_path_keeps_directory() {
        let path = Path::new("/data/dumps/2024.full-dump");
        assert_eq!(
            temp_path_for(path),
            PathBuf::from("/data/dumps/2024.full-dump.tmp")
        );
    }
}
