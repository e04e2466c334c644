//! Connection-level entry points.

use crate::config::{ExportOptions, ImportOptions};
use crate::connection::{ConnectionOptions, StoreConnector};
use crate::continuation::ContinuationTracker;
use crate::error::SmugglerResult;
use crate::etag::Etag;
use crate::export::{ExportPipeline, ExportReport};
use crate::import::{ImportPipeline, ImportReport};
use std::sync::Arc;
use tracing::info;

/// Runs exports, imports and purges against stores reached through a
/// [`StoreConnector`].
///
/// Every operation probes its stores before streaming anything, so an
/// unreachable server or a missing database fails before any file is
/// written or any document applied.
#[derive(Clone)]
pub struct Smuggler {
    connector: Arc<dyn StoreConnector>,
}

impl std::fmt::Debug for Smuggler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Smuggler").finish_non_exhaustive()
    }
}

impl Smuggler {
    /// Creates an engine using `connector` to reach stores.
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self { connector }
    }

    /// Exports the store at `from`.
    pub fn export(&self, from: &ConnectionOptions, options: ExportOptions) -> SmugglerResult<ExportReport> {
        options.validate()?;
        let source = self.connector.open(from)?;
        ExportPipeline::new(source, options).run()
    }

    /// Imports into the store at `to`, recording progress in `tracker`.
    ///
    /// When the options name a purge source, it is probed up front as well.
    pub fn import(
        &self,
        to: &ConnectionOptions,
        options: ImportOptions,
        tracker: Arc<ContinuationTracker>,
    ) -> SmugglerResult<ImportReport> {
        options.validate()?;
        let target = self.connector.open(to)?;
        let purge_source = match &options.purge_source {
            Some(source) => Some(self.connector.open(source)?),
            None => None,
        };
        let mut pipeline = ImportPipeline::new(target, options).with_tracker(tracker);
        if let Some(source) = purge_source {
            pipeline = pipeline.with_purge_source(source);
        }
        pipeline.run()
    }

    /// Purges tombstones with etag at or below `cutoff` from the store at
    /// `conn`. Returns how many were removed; repeating a purge removes
    /// nothing.
    pub fn purge_tombstones(&self, conn: &ConnectionOptions, cutoff: Etag) -> SmugglerResult<usize> {
        let store = self.connector.open(conn)?;
        let purged = store.purge_tombstones(cutoff)?;
        store.flush()?;
        info!(database = %conn.database, purged, %cutoff, "purged tombstones");
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExportDestination, ImportSource};
    use crate::connection::StoreServer;
    use crate::error::SmugglerError;
    use crate::store::DocumentStore;
    use serde_json::{json, Map};
    use tempfile::tempdir;

    fn server_with_source() -> Arc<StoreServer> {
        let server = Arc::new(StoreServer::new("http://localhost:8080"));
        let source = server.create_database("Source");
        for i in 1..=3 {
            source
                .put(&format!("users/{i}"), json!({"Name": i}), Map::new())
                .unwrap();
        }
        server
    }

    #[test]
    fn export_then_import_between_databases() {
        let dir = tempdir().unwrap();
        let server = server_with_source();
        server.create_database("Target");
        let smuggler = Smuggler::new(server.clone());

        smuggler
            .export(&server.options("Source"), ExportOptions::incremental(dir.path()))
            .unwrap();
        let report = smuggler
            .import(
                &server.options("Target"),
                ImportOptions::new(ImportSource::Directory(dir.path().into())),
                Arc::new(ContinuationTracker::in_memory()),
            )
            .unwrap();

        assert_eq!(report.documents_applied, 3);
        let target = server.database("Target").unwrap();
        assert_eq!(target.document_count().unwrap(), 3);
    }

    #[test]
    fn offline_server_fails_before_writing() {
        let dir = tempdir().unwrap();
        let server = server_with_source();
        server.set_online(false);
        let smuggler = Smuggler::new(server.clone());

        let err = smuggler
            .export(&server.options("Source"), ExportOptions::incremental(dir.path()))
            .unwrap_err();
        assert!(matches!(err, SmugglerError::Connectivity { .. }));
        assert!(err.is_retryable());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_target_is_not_created() {
        let dir = tempdir().unwrap();
        let server = server_with_source();
        let smuggler = Smuggler::new(server.clone());
        let file = dir.path().join("out.full-dump");
        smuggler
            .export(
                &server.options("Source"),
                ExportOptions::new(ExportDestination::File(file.clone())),
            )
            .unwrap();

        let err = smuggler
            .import(
                &server.options("Missing"),
                ImportOptions::new(ImportSource::File(file)),
                Arc::new(ContinuationTracker::in_memory()),
            )
            .unwrap_err();
        assert!(matches!(err, SmugglerError::DatabaseNotFound { .. }));
        assert!(err.to_string().contains("does not support database creation"));
        assert!(server.database("Missing").is_none());
    }

    #[test]
    fn purge_is_idempotent() {
        let server = server_with_source();
        let source = server.database("Source").unwrap();
        source.delete_if_exists("users/1").unwrap();
        source.delete_if_exists("users/2").unwrap();
        let cutoff = source.last_tombstone_etag().unwrap();
        let smuggler = Smuggler::new(server.clone());

        assert_eq!(smuggler.purge_tombstones(&server.options("Source"), cutoff).unwrap(), 2);
        assert_eq!(smuggler.purge_tombstones(&server.options("Source"), cutoff).unwrap(), 0);
    }
}
