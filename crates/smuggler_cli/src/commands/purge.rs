//! Purge-tombstones command implementation.

use super::connection;
use smuggler_core::{DirectoryConnector, Etag, Smuggler};
use std::path::Path;
use std::sync::Arc;

/// Purges tombstones with etag at or below `etag` from the store.
pub fn run(root: &Path, database: &str, etag: &str) -> Result<(), Box<dyn std::error::Error>> {
    let cutoff: Etag = etag.parse()?;
    let smuggler = Smuggler::new(Arc::new(DirectoryConnector::default()));
    let purged = smuggler.purge_tombstones(&connection(root, database), cutoff)?;

    println!("✓ Purged {} tombstone(s) up to {}", purged, cutoff);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_malformed_etag() {
        let dir = tempdir().unwrap();
        super::super::create_store::run(dir.path(), "Source").unwrap();
        let err = run(dir.path(), "Source", "not-an-etag").unwrap_err();
        assert!(err.to_string().contains("invalid etag"));
    }

    #[test]
    fn purging_an_empty_store_is_a_no_op() {
        let dir = tempdir().unwrap();
        super::super::create_store::run(dir.path(), "Source").unwrap();
        run(dir.path(), "Source", "00000000-0000-0001-0000-000000000010").unwrap();
        run(dir.path(), "Source", "00000000-0000-0001-0000-000000000010").unwrap();
    }
}
