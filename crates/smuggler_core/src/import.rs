//! Import pipeline.
//!
//! Applies a dump file, or a directory of dump files in creation order, to
//! a target store. Documents are applied as puts by key and deletions as
//! delete-if-exists, so re-applying anything is harmless. The target issues
//! its own etags; source etags only order the input and track progress.
//!
//! With a continuation token, progress is recorded after every batch and
//! every file. A second run with the same token skips completed files
//! without opening them (when the directory manifest lists them) and
//! resumes a partially applied file after the last recorded item.
//!
//! A failed apply aborts the current file and is returned to the caller.
//! Nothing is rolled back; running again is the recovery path.
//!
//! A pipeline refuses a second `run` while one is in progress.

use crate::cancel::{CancelHandle, RunSlot};
use crate::config::{ImportOptions, ImportSource};
use crate::continuation::ContinuationTracker;
use crate::dump::{list_dump_files, read_dump, DumpContents, DumpManifest};
use crate::error::{SmugglerError, SmugglerResult};
use crate::etag::{Etag, EtagPair};
use crate::governor::BatchSizeGovernor;
use crate::store::DocumentStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// Outcome of a successful import run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Files applied in full during this run.
    pub files_applied: usize,
    /// Files skipped because the continuation token already covered them.
    pub files_skipped: usize,
    /// Files left unapplied because they could not be parsed.
    pub corrupt_files: Vec<PathBuf>,
    /// Documents written to the target.
    pub documents_applied: usize,
    /// Documents skipped because they were applied by an earlier run.
    pub documents_skipped: usize,
    /// Deletions applied to the target.
    pub deletions_applied: usize,
    /// Deletions skipped because they were applied by an earlier run.
    pub deletions_skipped: usize,
    /// Batch size used for the run.
    pub effective_batch_size: usize,
    /// Highest source deletion etag known to be applied.
    pub last_applied_deletion_etag: Etag,
    /// Tombstones purged from the source after the import.
    pub tombstones_purged: usize,
    /// Wall time of the run.
    pub duration: Duration,
}

/// Replays dumps into a target store.
pub struct ImportPipeline {
    target: Arc<dyn DocumentStore>,
    options: ImportOptions,
    tracker: Arc<ContinuationTracker>,
    purge_source: Option<Arc<dyn DocumentStore>>,
    cancel: CancelHandle,
    slot: RunSlot,
}

impl std::fmt::Debug for ImportPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportPipeline")
            .field("target", &self.target.name())
            .field("options", &self.options)
            .finish()
    }
}

struct FileRun<'a> {
    path: &'a Path,
    identity: String,
    token: Option<&'a str>,
    batch_size: usize,
}

impl ImportPipeline {
    /// Creates a pipeline applying `options.source` to `target`.
    ///
    /// Continuation records are kept in memory unless a tracker is supplied
    /// with [`ImportPipeline::with_tracker`].
    pub fn new(target: Arc<dyn DocumentStore>, options: ImportOptions) -> Self {
        Self {
            target,
            options,
            tracker: Arc::new(ContinuationTracker::in_memory()),
            purge_source: None,
            cancel: CancelHandle::new(),
            slot: RunSlot::default(),
        }
    }

    /// Uses `tracker` for continuation records.
    #[must_use]
    pub fn with_tracker(mut self, tracker: Arc<ContinuationTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Purges tombstones consumed by a successful run from `source`.
    #[must_use]
    pub fn with_purge_source(mut self, source: Arc<dyn DocumentStore>) -> Self {
        self.purge_source = Some(source);
        self
    }

    /// Requests cancellation of the run in progress.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns a handle that cancels this pipeline's runs.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Runs one import.
    ///
    /// Fails with `Busy` if this pipeline is already running.
    pub fn run(&self) -> SmugglerResult<ImportReport> {
        let _claim = self.slot.claim(self.target.name())?;
        self.cancel.reset();
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "import",
            %run_id,
            database = self.target.name(),
            source = %self.options.source.path().display()
        );
        let _guard = span.enter();

        let started = Instant::now();
        let mut report = ImportReport::default();
        match self.execute(&mut report) {
            Ok(()) => {
                report.duration = started.elapsed();
                info!(
                    files_applied = report.files_applied,
                    files_skipped = report.files_skipped,
                    documents = report.documents_applied,
                    deletions = report.deletions_applied,
                    elapsed_ms = report.duration.as_millis() as u64,
                    "import finished"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(
                    error = %err,
                    documents = report.documents_applied,
                    deletions = report.deletions_applied,
                    "import failed"
                );
                Err(err)
            }
        }
    }

    fn execute(&self, report: &mut ImportReport) -> SmugglerResult<()> {
        self.options.validate()?;

        let governor =
            BatchSizeGovernor::for_run(self.options.batch_size, self.target.max_batch_size());
        report.effective_batch_size = governor.effective();

        let (files, manifest) = match &self.options.source {
            ImportSource::File(path) => (vec![path.clone()], DumpManifest::default()),
            ImportSource::Directory(dir) => {
                let manifest = DumpManifest::load(dir).unwrap_or_else(|err| {
                    warn!(error = %err, "ignoring unreadable dump manifest");
                    DumpManifest::default()
                });
                (list_dump_files(dir)?, manifest)
            }
        };
        info!(files = files.len(), batch_size = report.effective_batch_size, "import started");

        let token = self.options.continuation_token.as_deref();
        for path in &files {
            self.cancel.check()?;
            let identity = file_identity(path);

            if let (Some(token), Some(entry)) = (token, manifest.entry(&identity)) {
                if self.tracker.should_skip(token, &identity, &entry.max_etags())? {
                    debug!(file = %identity, "already applied, skipping");
                    report.files_skipped += 1;
                    report.last_applied_deletion_etag = report
                        .last_applied_deletion_etag
                        .max(entry.last_doc_delete_etag);
                    continue;
                }
            }

            let contents = match read_dump(path) {
                Ok(contents) => contents,
                Err(err @ SmugglerError::CorruptInput { .. })
                    if matches!(self.options.source, ImportSource::Directory(_)) =>
                {
                    warn!(file = %identity, error = %err, "skipping corrupt dump file");
                    report.corrupt_files.push(path.clone());
                    continue;
                }
                Err(err) => return Err(err),
            };
            let max_etags = contents.max_etags();

            if let Some(token) = token {
                if self.tracker.should_skip(token, &identity, &max_etags)? {
                    debug!(file = %identity, "already applied, skipping");
                    report.files_skipped += 1;
                    report.last_applied_deletion_etag =
                        report.last_applied_deletion_etag.max(max_etags.deletions);
                    continue;
                }
            }

            let run = FileRun {
                path,
                identity,
                token,
                batch_size: report.effective_batch_size,
            };
            self.apply_file(&run, &contents, report)?;
            report.files_applied += 1;
            report.last_applied_deletion_etag =
                report.last_applied_deletion_etag.max(max_etags.deletions);
        }

        if let Some(source) = &self.purge_source {
            if !report.corrupt_files.is_empty() {
                warn!("corrupt files were skipped, not purging source tombstones");
            } else if !report.last_applied_deletion_etag.is_empty() {
                report.tombstones_purged =
                    source.purge_tombstones(report.last_applied_deletion_etag)?;
                source.flush()?;
                info!(
                    purged = report.tombstones_purged,
                    up_to = %report.last_applied_deletion_etag,
                    "purged source tombstones"
                );
            }
        }
        Ok(())
    }

    fn apply_file(
        &self,
        run: &FileRun<'_>,
        contents: &DumpContents,
        report: &mut ImportReport,
    ) -> SmugglerResult<()> {
        let resume = match run.token {
            Some(token) => self
                .tracker
                .progress(token, &run.identity)?
                .map(|p| p.applied_through)
                .unwrap_or(EtagPair::EMPTY),
            None => EtagPair::EMPTY,
        };
        let mut applied = resume;
        info!(
            file = %run.identity,
            documents = contents.documents.len(),
            deletions = contents.deletions.len(),
            "applying dump file"
        );

        for batch in contents.documents.chunks(run.batch_size) {
            self.cancel.check()?;
            for document in batch {
                if document.etag <= resume.documents {
                    report.documents_skipped += 1;
                    continue;
                }
                self.target
                    .put(
                        &document.key,
                        document.body.clone(),
                        document.metadata.clone(),
                    )
                    .map_err(|e| apply_error(e, &document.key, document.etag, run.path))?;
                applied.documents = applied.documents.max(document.etag);
                report.documents_applied += 1;
            }
            self.commit_batch(run, applied)?;
        }

        for batch in contents.deletions.chunks(run.batch_size) {
            self.cancel.check()?;
            for deletion in batch {
                if deletion.etag <= resume.deletions {
                    report.deletions_skipped += 1;
                    continue;
                }
                self.target
                    .delete_if_exists(&deletion.key)
                    .map_err(|e| apply_error(e, &deletion.key, deletion.etag, run.path))?;
                applied.deletions = applied.deletions.max(deletion.etag);
                report.deletions_applied += 1;
            }
            self.commit_batch(run, applied)?;
        }

        self.target.flush()?;
        if let Some(token) = run.token {
            self.tracker
                .record_applied(token, &run.identity, applied.max(contents.max_etags()))?;
        }
        Ok(())
    }

    /// Makes a batch durable on the target, then records it.
    fn commit_batch(&self, run: &FileRun<'_>, applied: EtagPair) -> SmugglerResult<()> {
        self.target.flush()?;
        if let Some(token) = run.token {
            self.tracker.record_progress(token, &run.identity, applied)?;
        }
        Ok(())
    }
}

fn file_identity(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn apply_error(err: SmugglerError, key: &str, etag: Etag, path: &Path) -> SmugglerError {
    if err.is_retryable() {
        return err;
    }
    SmugglerError::apply(key, etag, err.to_string()).in_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExportDestination, ExportOptions};
    use crate::export::ExportPipeline;
    use crate::store::{DocumentRecord, MemoryStore, MemoryStoreConfig};
    use crate::tombstones::Tombstone;
    use serde_json::{json, Map, Value};
    use std::fs;
    use tempfile::tempdir;

    fn put_users(store: &MemoryStore, range: std::ops::RangeInclusive<usize>) {
        for i in range {
            store
                .put(&format!("users/{i}"), json!({"Name": format!("user{i}")}), Map::new())
                .unwrap();
        }
    }

    fn export_incremental(source: &Arc<MemoryStore>, dir: &Path) {
        ExportPipeline::new(source.clone(), ExportOptions::incremental(dir))
            .run()
            .unwrap();
    }

    /// Target that refuses to write one key, or cancels a run once it has
    /// written one.
    struct FaultyStore {
        inner: MemoryStore,
        reject: Option<String>,
        cancel_after: Option<String>,
        cancel: parking_lot::Mutex<Option<CancelHandle>>,
    }

    impl FaultyStore {
        fn rejecting(key: &str) -> Self {
            Self {
                inner: MemoryStore::new("Target"),
                reject: Some(key.to_string()),
                cancel_after: None,
                cancel: parking_lot::Mutex::new(None),
            }
        }

        fn cancelling_after(key: &str) -> Self {
            Self {
                inner: MemoryStore::new("Target"),
                reject: None,
                cancel_after: Some(key.to_string()),
                cancel: parking_lot::Mutex::new(None),
            }
        }
    }

    impl DocumentStore for FaultyStore {
        fn name(&self) -> &str {
            self.inner.name()
        }
        fn read_documents_since(&self, after: Etag, limit: usize) -> SmugglerResult<Vec<DocumentRecord>> {
            self.inner.read_documents_since(after, limit)
        }
        fn last_document_etag(&self) -> SmugglerResult<Etag> {
            self.inner.last_document_etag()
        }
        fn read_tombstones(&self, after: Etag, up_to: Option<Etag>, limit: usize) -> SmugglerResult<Vec<Tombstone>> {
            self.inner.read_tombstones(after, up_to, limit)
        }
        fn last_tombstone_etag(&self) -> SmugglerResult<Etag> {
            self.inner.last_tombstone_etag()
        }
        fn put(&self, key: &str, payload: Value, metadata: Map<String, Value>) -> SmugglerResult<Etag> {
            if self.reject.as_deref() == Some(key) {
                return Err(SmugglerError::invalid_options("rejected"));
            }
            let etag = self.inner.put(key, payload, metadata)?;
            if self.cancel_after.as_deref() == Some(key) {
                if let Some(handle) = self.cancel.lock().as_ref() {
                    handle.cancel();
                }
            }
            Ok(etag)
        }
        fn delete_if_exists(&self, key: &str) -> SmugglerResult<bool> {
            self.inner.delete_if_exists(key)
        }
        fn purge_tombstones(&self, cutoff: Etag) -> SmugglerResult<usize> {
            self.inner.purge_tombstones(cutoff)
        }
        fn get(&self, key: &str) -> SmugglerResult<Option<DocumentRecord>> {
            self.inner.get(key)
        }
        fn document_count(&self) -> SmugglerResult<usize> {
            self.inner.document_count()
        }
        fn max_batch_size(&self) -> usize {
            self.inner.max_batch_size()
        }
    }

    #[test]
    fn imports_full_dump_file() {
        let dir = tempdir().unwrap();
        let source = Arc::new(MemoryStore::new("Source"));
        put_users(&source, 1..=5);
        let path = dir.path().join("a.full-dump");
        ExportPipeline::new(source, ExportOptions::new(ExportDestination::File(path.clone())))
            .run()
            .unwrap();

        let target = Arc::new(MemoryStore::new("Target"));
        let report = ImportPipeline::new(target.clone(), ImportOptions::new(ImportSource::File(path)))
            .run()
            .unwrap();

        assert_eq!(report.files_applied, 1);
        assert_eq!(report.documents_applied, 5);
        assert_eq!(target.document_count().unwrap(), 5);
        let doc = target.get("users/3").unwrap().unwrap();
        assert_eq!(doc.payload["Name"], json!("user3"));
    }

    #[test]
    fn applies_deletions_in_file_order() {
        let dir = tempdir().unwrap();
        let source = Arc::new(MemoryStore::new("Source"));
        put_users(&source, 1..=3);
        export_incremental(&source, dir.path());
        source.delete_if_exists("users/2").unwrap();
        export_incremental(&source, dir.path());

        let target = Arc::new(MemoryStore::new("Target"));
        let report = ImportPipeline::new(
            target.clone(),
            ImportOptions::new(ImportSource::Directory(dir.path().into())),
        )
        .run()
        .unwrap();

        assert_eq!(report.files_applied, 2);
        assert_eq!(report.deletions_applied, 1);
        assert!(target.get("users/2").unwrap().is_none());
        assert_eq!(target.document_count().unwrap(), 2);
        assert_eq!(
            report.last_applied_deletion_etag,
            source.last_tombstone_etag().unwrap()
        );
    }

    #[test]
    fn same_token_skips_applied_files() {
        let dir = tempdir().unwrap();
        let source = Arc::new(MemoryStore::new("Source"));
        put_users(&source, 1..=4);
        export_incremental(&source, dir.path());

        let target = Arc::new(MemoryStore::new("Target"));
        let tracker = Arc::new(ContinuationTracker::in_memory());
        let options = ImportOptions::new(ImportSource::Directory(dir.path().into()))
            .with_continuation_token("migration-1");

        let first = ImportPipeline::new(target.clone(), options.clone())
            .with_tracker(tracker.clone())
            .run()
            .unwrap();
        assert_eq!(first.files_applied, 1);
        let etag_before = target.get("users/1").unwrap().unwrap().etag;

        let second = ImportPipeline::new(target.clone(), options)
            .with_tracker(tracker)
            .run()
            .unwrap();
        assert_eq!(second.files_skipped, 1);
        assert_eq!(second.documents_applied, 0);
        assert_eq!(target.get("users/1").unwrap().unwrap().etag, etag_before);
    }

    #[test]
    fn apply_failure_keeps_partial_progress_and_resumes() {
        let dir = tempdir().unwrap();
        let source = Arc::new(MemoryStore::new("Source"));
        put_users(&source, 1..=4);
        export_incremental(&source, dir.path());

        let tracker = Arc::new(ContinuationTracker::in_memory());
        let options = ImportOptions::new(ImportSource::Directory(dir.path().into()))
            .with_batch_size(1)
            .with_continuation_token("t");
        let failing = Arc::new(FaultyStore::rejecting("users/3"));
        let err = ImportPipeline::new(failing.clone(), options.clone())
            .with_tracker(tracker.clone())
            .run()
            .unwrap_err();
        match err {
            SmugglerError::Apply { key, path, .. } => {
                assert_eq!(key, "users/3");
                assert!(path.is_some());
            }
            other => panic!("expected Apply, got {other:?}"),
        }
        assert_eq!(failing.document_count().unwrap(), 2);

        let target = Arc::new(MemoryStore::new("Target"));
        let resumed = ImportPipeline::new(target.clone(), options)
            .with_tracker(tracker)
            .run()
            .unwrap();
        assert_eq!(resumed.documents_skipped, 2);
        assert_eq!(resumed.documents_applied, 2);
        assert!(target.get("users/1").unwrap().is_none());
        assert!(target.get("users/4").unwrap().is_some());
    }

    #[test]
    fn cancelled_import_keeps_recorded_batches() {
        let dir = tempdir().unwrap();
        let source = Arc::new(MemoryStore::new("Source"));
        put_users(&source, 1..=4);
        export_incremental(&source, dir.path());

        let target = Arc::new(FaultyStore::cancelling_after("users/2"));
        let options = ImportOptions::new(ImportSource::Directory(dir.path().into()))
            .with_batch_size(1)
            .with_continuation_token("t");
        let tracker = Arc::new(ContinuationTracker::in_memory());
        let pipeline = ImportPipeline::new(target.clone(), options).with_tracker(tracker);
        *target.cancel.lock() = Some(pipeline.cancel_handle());

        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, SmugglerError::Cancelled));
        assert_eq!(target.document_count().unwrap(), 2);
        let first_etag = target.get("users/1").unwrap().unwrap().etag;

        let resumed = pipeline.run().unwrap();
        assert_eq!(resumed.documents_skipped, 2);
        assert_eq!(resumed.documents_applied, 2);
        assert_eq!(target.document_count().unwrap(), 4);
        assert_eq!(target.get("users/1").unwrap().unwrap().etag, first_etag);
    }

    #[test]
    fn completed_file_is_skipped_without_reading_it() {
        let dir = tempdir().unwrap();
        let source = Arc::new(MemoryStore::new("Source"));
        put_users(&source, 1..=3);
        export_incremental(&source, dir.path());

        let target = Arc::new(MemoryStore::new("Target"));
        let tracker = Arc::new(ContinuationTracker::in_memory());
        let options = ImportOptions::new(ImportSource::Directory(dir.path().into()))
            .with_continuation_token("m");
        ImportPipeline::new(target.clone(), options.clone())
            .with_tracker(tracker.clone())
            .run()
            .unwrap();

        let dump = list_dump_files(dir.path()).unwrap().remove(0);
        fs::write(&dump, b"not a dump").unwrap();

        let again = ImportPipeline::new(target, options)
            .with_tracker(tracker)
            .run()
            .unwrap();
        assert_eq!(again.files_skipped, 1);
        assert_eq!(again.files_applied, 0);
        assert!(again.corrupt_files.is_empty());
    }

    #[test]
    fn overlapping_run_is_refused() {
        let target = Arc::new(MemoryStore::new("Target"));
        let pipeline = ImportPipeline::new(
            target,
            ImportOptions::new(ImportSource::File(PathBuf::from("unused.full-dump"))),
        );
        let _running = pipeline.slot.claim("Target").unwrap();

        assert!(matches!(
            pipeline.run(),
            Err(SmugglerError::Busy { target }) if target == "Target"
        ));
    }

    #[test]
    fn corrupt_single_file_aborts_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.full-dump");
        fs::write(&path, b"[{").unwrap();

        let target = Arc::new(MemoryStore::new("Target"));
        let err = ImportPipeline::new(target, ImportOptions::new(ImportSource::File(path)))
            .run()
            .unwrap_err();
        assert!(matches!(err, SmugglerError::CorruptInput { .. }));
    }

    #[test]
    fn corrupt_file_in_directory_is_skipped() {
        let dir = tempdir().unwrap();
        let source = Arc::new(MemoryStore::new("Source"));
        put_users(&source, 1..=2);
        export_incremental(&source, dir.path());
        fs::write(dir.path().join("9999-12-31-23-59-59-999.incremental-dump"), b"{").unwrap();

        let target = Arc::new(MemoryStore::new("Target"));
        let report = ImportPipeline::new(
            target.clone(),
            ImportOptions::new(ImportSource::Directory(dir.path().into())),
        )
        .with_purge_source(source.clone())
        .run()
        .unwrap();
        assert_eq!(report.files_applied, 1);
        assert_eq!(report.corrupt_files.len(), 1);
        assert_eq!(report.tombstones_purged, 0);
        assert_eq!(target.document_count().unwrap(), 2);
    }

    #[test]
    fn purges_consumed_source_tombstones() {
        let dir = tempdir().unwrap();
        let source = Arc::new(MemoryStore::new("Source"));
        put_users(&source, 1..=3);
        source.delete_if_exists("users/1").unwrap();
        source.delete_if_exists("users/2").unwrap();
        export_incremental(&source, dir.path());
        source.delete_if_exists("users/3").unwrap();

        let target = Arc::new(MemoryStore::new("Target"));
        let report = ImportPipeline::new(
            target,
            ImportOptions::new(ImportSource::Directory(dir.path().into())),
        )
        .with_purge_source(source.clone())
        .run()
        .unwrap();

        assert_eq!(report.tombstones_purged, 2);
        let remaining = source.read_tombstones(Etag::EMPTY, None, 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key, "users/3");
    }

    #[test]
    fn target_limit_caps_batch_size() {
        let dir = tempdir().unwrap();
        let source = Arc::new(MemoryStore::new("Source"));
        put_users(&source, 1..=3);
        export_incremental(&source, dir.path());

        let target = Arc::new(MemoryStore::with_config(
            "Target",
            MemoryStoreConfig::new().with_max_batch_size(1234),
        ));
        let report = ImportPipeline::new(
            target,
            ImportOptions::new(ImportSource::Directory(dir.path().into())).with_batch_size(4321),
        )
        .run()
        .unwrap();
        assert_eq!(report.effective_batch_size, 1234);
    }
}
