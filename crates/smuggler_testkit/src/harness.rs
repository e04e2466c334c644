//! Source/target migration harness.
//!
//! Wraps a source store, a target store, a dump directory and a
//! continuation tracker, so a test reads as the sequence of exports and
//! imports it performs.

use crate::fixtures::TestDumpDir;
use serde_json::Value;
use smuggler_core::{
    ContinuationTracker, DocumentStore, ExportOptions, ExportPipeline, ExportReport, ImportOptions,
    ImportPipeline, ImportReport, ImportSource, MemoryStore, SmugglerResult,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// A source store migrated into a target store through a dump directory.
pub struct MigrationHarness {
    source: Arc<MemoryStore>,
    target: Arc<MemoryStore>,
    dumps: TestDumpDir,
    tracker: Arc<ContinuationTracker>,
}

impl MigrationHarness {
    /// Creates a harness with empty stores.
    pub fn new() -> Self {
        Self::with_stores(
            Arc::new(MemoryStore::new("Source")),
            Arc::new(MemoryStore::new("Target")),
        )
    }

    /// Creates a harness around existing stores.
    pub fn with_stores(source: Arc<MemoryStore>, target: Arc<MemoryStore>) -> Self {
        Self {
            source,
            target,
            dumps: TestDumpDir::new(),
            tracker: Arc::new(ContinuationTracker::in_memory()),
        }
    }

    /// The source store.
    pub fn source(&self) -> &Arc<MemoryStore> {
        &self.source
    }

    /// The target store.
    pub fn target(&self) -> &Arc<MemoryStore> {
        &self.target
    }

    /// The dump directory.
    pub fn dump_dir(&self) -> &Path {
        self.dumps.path()
    }

    /// The continuation tracker shared by every import.
    pub fn tracker(&self) -> &Arc<ContinuationTracker> {
        &self.tracker
    }

    /// Runs an incremental export of the source into the dump directory.
    pub fn export_incremental(&self) -> SmugglerResult<ExportReport> {
        self.export(ExportOptions::incremental(self.dump_dir()))
    }

    /// Runs an export with custom options.
    pub fn export(&self, options: ExportOptions) -> SmugglerResult<ExportReport> {
        ExportPipeline::new(self.source.clone(), options).run()
    }

    /// Imports the dump directory into the target.
    pub fn import(&self, token: Option<&str>, batch_size: Option<usize>) -> SmugglerResult<ImportReport> {
        let mut options = ImportOptions::new(ImportSource::Directory(self.dump_dir().to_path_buf()));
        if let Some(token) = token {
            options = options.with_continuation_token(token);
        }
        if let Some(size) = batch_size {
            options = options.with_batch_size(size);
        }
        ImportPipeline::new(self.target.clone(), options)
            .with_tracker(self.tracker.clone())
            .run()
    }

    /// Asserts that the target holds exactly the source's live documents.
    pub fn assert_converged(&self) {
        let source = bodies(&self.source);
        let target = bodies(&self.target);
        assert_eq!(
            source.keys().collect::<Vec<_>>(),
            target.keys().collect::<Vec<_>>(),
            "source and target hold different keys"
        );
        for (key, body) in &source {
            assert_eq!(Some(body), target.get(key), "body mismatch for {key}");
        }
    }
}

impl Default for MigrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Live document bodies of `store` by key.
pub fn bodies(store: &MemoryStore) -> BTreeMap<String, Value> {
    store
        .snapshot_documents()
        .into_iter()
        .map(|record| (record.key, record.payload))
        .collect()
}

/// Target-side etags of `store` by key.
pub fn etags_by_key(store: &MemoryStore) -> BTreeMap<String, smuggler_core::Etag> {
    store
        .snapshot_documents()
        .into_iter()
        .map(|record| (record.key, record.etag))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{delete_user, put_users};

    #[test]
    fn converges_after_delete() {
        let harness = MigrationHarness::new();
        put_users(harness.source(), 1..=3);
        harness.export_incremental().unwrap();
        delete_user(harness.source(), 2);
        harness.export_incremental().unwrap();

        harness.import(None, None).unwrap();
        harness.assert_converged();
        assert!(harness.target().get("users/2").unwrap().is_none());
    }
}
