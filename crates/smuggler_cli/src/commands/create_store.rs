//! Create-store command implementation.

use smuggler_core::{DirectoryStore, MemoryStoreConfig};
use std::path::Path;
use tracing::info;

/// Creates an empty store named `database` under `root`.
pub fn run(root: &Path, database: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = root.join(database);
    info!("Creating store at {:?}", path);

    let store = DirectoryStore::create(&path, MemoryStoreConfig::default())?;
    drop(store);

    println!("✓ Store created");
    println!("  Path: {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_once() {
        let dir = tempdir().unwrap();
        run(dir.path(), "Northwind").unwrap();
        assert!(DirectoryStore::exists(&dir.path().join("Northwind")));
        assert!(run(dir.path(), "Northwind").is_err());
    }
}
