//! CLI command implementations.

pub mod create_store;
pub mod export;
pub mod import;
pub mod periodic;
pub mod purge;
pub mod state;

use smuggler_core::ConnectionOptions;
use std::path::Path;

/// Connection options for a store under `root`.
pub(crate) fn connection(root: &Path, database: &str) -> ConnectionOptions {
    ConnectionOptions::new(root.to_string_lossy(), database)
}
