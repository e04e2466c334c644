//! Export pipeline.
//!
//! A run moves through `Idle -> ReadingDocs -> ReadingDeletions ->
//! Finalizing -> Idle`, or to `Failed` from any phase.
//!
//! The source keeps taking writes while an export runs. The scan is not a
//! snapshot: each batch is bounded by the store's high-water etag read at
//! the start of that batch (and by the configured ceiling), so a run
//! observes a prefix of the changes made before it finished.
//!
//! Nothing a later run depends on is written until Finalizing. A run that
//! fails or is cancelled earlier leaves no dump file and no new state, so a
//! retry starts from the same lower bounds.
//!
//! One run at a time: a pipeline refuses a second concurrent `run`, and a
//! directory destination is locked for the whole run so separate pipelines
//! and processes cannot write overlapping dumps into it.

use crate::cancel::{CancelHandle, RunSlot};
use crate::config::{ExportDestination, ExportOptions};
use crate::cursor::SequenceCursor;
use crate::dump::{DumpKind, DumpManifest, DumpWriter, ManifestEntry};
use crate::error::SmugglerResult;
use crate::etag::{Etag, EtagPair};
use crate::files::DirectoryLock;
use crate::governor::BatchSizeGovernor;
use crate::state::OperationState;
use crate::store::DocumentStore;
use chrono::Utc;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// Phase of an export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPhase {
    /// No run in progress.
    Idle,
    /// Streaming documents.
    ReadingDocs,
    /// Streaming deletions.
    ReadingDeletions,
    /// Closing the dump and persisting state.
    Finalizing,
    /// The last run failed.
    Failed,
}

impl ExportPhase {
    /// Returns true while a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::ReadingDocs | Self::ReadingDeletions | Self::Finalizing
        )
    }
}

/// Outcome of a successful export run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    /// Identifier of the run, also attached to its log span.
    pub run_id: Uuid,
    /// Kind of dump produced.
    pub kind: DumpKind,
    /// File written, or `None` if an incremental run found nothing new.
    pub file_path: Option<PathBuf>,
    /// Lower bounds for the next incremental run.
    pub last_etags: EtagPair,
    /// Documents written.
    pub documents_exported: usize,
    /// Deletions written.
    pub deletions_exported: usize,
    /// Batch size used for the run.
    pub effective_batch_size: usize,
    /// Wall time of the run.
    pub duration: Duration,
}

/// Streams a source store into a dump.
pub struct ExportPipeline {
    source: Arc<dyn DocumentStore>,
    options: ExportOptions,
    phase: RwLock<ExportPhase>,
    cancel: CancelHandle,
    slot: RunSlot,
}

impl std::fmt::Debug for ExportPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportPipeline")
            .field("source", &self.source.name())
            .field("options", &self.options)
            .field("phase", &self.phase())
            .finish()
    }
}

impl ExportPipeline {
    /// Creates a pipeline exporting `source` according to `options`.
    pub fn new(source: Arc<dyn DocumentStore>, options: ExportOptions) -> Self {
        Self {
            source,
            options,
            phase: RwLock::new(ExportPhase::Idle),
            cancel: CancelHandle::new(),
            slot: RunSlot::default(),
        }
    }

    /// Returns the current phase.
    pub fn phase(&self) -> ExportPhase {
        *self.phase.read()
    }

    /// Returns the options.
    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Requests cancellation of the run in progress.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns a handle that cancels this pipeline's runs.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn set_phase(&self, phase: ExportPhase) {
        *self.phase.write() = phase;
    }

    /// Runs one export.
    ///
    /// Cancellation requested before the call is cleared; cancel from
    /// another thread while the run is in progress.
    ///
    /// Fails with `Busy`, leaving the phase untouched, if this pipeline is
    /// already running or another holder has locked the dump directory.
    pub fn run(&self) -> SmugglerResult<ExportReport> {
        let destination = self.options.destination.path();
        let _claim = self.slot.claim(destination.display().to_string())?;
        let _lock = match &self.options.destination {
            ExportDestination::Directory(dir) => Some(DirectoryLock::acquire(dir)?),
            ExportDestination::File(_) => None,
        };
        self.cancel.reset();
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "export",
            %run_id,
            database = self.source.name(),
            destination = %destination.display()
        );
        let _guard = span.enter();

        let started = Instant::now();
        match self.execute(run_id, started) {
            Ok(report) => {
                self.set_phase(ExportPhase::Idle);
                info!(
                    documents = report.documents_exported,
                    deletions = report.deletions_exported,
                    elapsed_ms = report.duration.as_millis() as u64,
                    "export finished"
                );
                Ok(report)
            }
            Err(err) => {
                self.set_phase(ExportPhase::Failed);
                warn!(error = %err, "export failed");
                Err(err)
            }
        }
    }

    fn execute(&self, run_id: Uuid, started: Instant) -> SmugglerResult<ExportReport> {
        self.options.validate()?;

        let governor =
            BatchSizeGovernor::for_run(self.options.batch_size, self.source.max_batch_size());
        let batch_size = governor.effective();
        if governor.was_capped() {
            info!(
                requested = governor.config().requested,
                server_max = governor.config().server_max,
                "requested batch size exceeds the server limit"
            );
        }

        let kind = if self.options.incremental {
            DumpKind::Incremental
        } else {
            DumpKind::Full
        };
        let deletion_baseline = self.cap_deletions(self.source.last_tombstone_etag()?);
        let lower = self.lower_bounds(kind, deletion_baseline)?;
        info!(?kind, batch_size, after = %lower.documents, "export started");

        let mut writer = match &self.options.destination {
            ExportDestination::Directory(dir) => DumpWriter::create_in(dir, kind, Utc::now())?,
            ExportDestination::File(path) => DumpWriter::create(path.clone(), kind)?,
        };

        let streamed = self.stream(&mut writer, kind, lower, batch_size);
        let last_written = match streamed {
            Ok(last_written) => last_written,
            Err(err) => {
                writer.abandon();
                return Err(err);
            }
        };

        self.set_phase(ExportPhase::Finalizing);
        let documents_exported = writer.documents_written();
        let deletions_exported = writer.deletions_written();

        if kind == DumpKind::Incremental && documents_exported == 0 && deletions_exported == 0 {
            writer.abandon();
            info!("no changes since the last export, nothing written");
            return Ok(ExportReport {
                run_id,
                kind,
                file_path: None,
                last_etags: lower,
                documents_exported,
                deletions_exported,
                effective_batch_size: batch_size,
                duration: started.elapsed(),
            });
        }

        let summary = writer.finish()?;
        let last_etags = match kind {
            DumpKind::Incremental => last_written,
            // A full dump reflects every deletion up to the captured
            // baseline, so the next incremental run starts after it.
            DumpKind::Full => EtagPair::new(
                last_written.documents,
                deletion_baseline.max(lower.deletions),
            ),
        };

        if let ExportDestination::Directory(dir) = &self.options.destination {
            let mut manifest = DumpManifest::load(dir)?;
            manifest.record(ManifestEntry::from_summary(&summary));
            manifest.save(dir)?;
            OperationState::new(last_etags)
                .with_file_path(&summary.path)
                .save(dir)?;
        }
        debug!(path = %summary.path.display(), "dump finalized");

        Ok(ExportReport {
            run_id,
            kind,
            file_path: Some(summary.path),
            last_etags,
            documents_exported,
            deletions_exported,
            effective_batch_size: batch_size,
            duration: started.elapsed(),
        })
    }

    fn cap_deletions(&self, etag: Etag) -> Etag {
        match self.options.max_deletion_etag {
            Some(max) => etag.min(max),
            None => etag,
        }
    }

    /// Lower bounds for this run: explicit start etags, else the state
    /// recorded in the destination for incremental runs, else the beginning.
    fn lower_bounds(&self, kind: DumpKind, deletion_baseline: Etag) -> SmugglerResult<EtagPair> {
        if let Some(start) = self.options.start_etags {
            return Ok(start);
        }
        let ExportDestination::Directory(dir) = &self.options.destination else {
            return Ok(EtagPair::EMPTY);
        };
        if kind != DumpKind::Incremental {
            return Ok(EtagPair::EMPTY);
        }
        match OperationState::load(dir)? {
            None => Ok(EtagPair::EMPTY),
            Some(loaded) if loaded.legacy => {
                warn!(
                    deletions_after = %deletion_baseline,
                    "state file predates deletion tracking; existing tombstones are treated as exported"
                );
                Ok(EtagPair::new(loaded.state.last_doc_etag, deletion_baseline))
            }
            Some(loaded) => Ok(loaded.state.last_etags()),
        }
    }

    /// Streams both sections and returns the last etag written per stream,
    /// or the lower bound for a stream that wrote nothing.
    fn stream(
        &self,
        writer: &mut DumpWriter,
        kind: DumpKind,
        lower: EtagPair,
        batch_size: usize,
    ) -> SmugglerResult<EtagPair> {
        self.set_phase(ExportPhase::ReadingDocs);
        let documents = self.export_documents(writer, lower.documents, batch_size)?;

        let deletions = if kind == DumpKind::Incremental {
            self.set_phase(ExportPhase::ReadingDeletions);
            self.export_deletions(writer, lower.deletions, batch_size)?
        } else {
            lower.deletions
        };
        Ok(EtagPair::new(documents, deletions))
    }

    /// Writes documents with etag in `(after, max_etag]`.
    ///
    /// Returns the last etag written, or `after` if nothing was written.
    /// Either value is a valid exclusive lower bound for the next run.
    pub fn export_documents(
        &self,
        writer: &mut DumpWriter,
        after: Etag,
        batch_size: usize,
    ) -> SmugglerResult<Etag> {
        let mut cursor = SequenceCursor::new(after, self.options.max_etag);
        loop {
            self.cancel.check()?;
            if cursor.is_exhausted() {
                break;
            }
            let ceiling = cursor.batch_ceiling(self.source.last_document_etag()?);
            if ceiling <= cursor.position() {
                break;
            }

            let batch = self
                .source
                .read_documents_since(cursor.position(), batch_size)?;
            let fetched = batch.len();
            let mut written = 0;
            for record in &batch {
                if !cursor.admits(record.etag, ceiling) {
                    break;
                }
                writer.write_document(record)?;
                cursor.advance(record.etag);
                written += 1;
            }
            debug!(written, through = %cursor.position(), "document batch");

            if written < fetched || fetched < batch_size {
                break;
            }
        }
        Ok(cursor.position())
    }

    /// Writes deletions with etag in `(after, max_deletion_etag]`.
    ///
    /// Returns the last etag written, or `after` if nothing was written.
    pub fn export_deletions(
        &self,
        writer: &mut DumpWriter,
        after: Etag,
        batch_size: usize,
    ) -> SmugglerResult<Etag> {
        let mut cursor = SequenceCursor::new(after, self.options.max_deletion_etag);
        loop {
            self.cancel.check()?;
            if cursor.is_exhausted() {
                break;
            }
            let ceiling = cursor.batch_ceiling(self.source.last_tombstone_etag()?);
            if ceiling <= cursor.position() {
                break;
            }

            let batch = self
                .source
                .read_tombstones(cursor.position(), Some(ceiling), batch_size)?;
            let fetched = batch.len();
            for tombstone in &batch {
                writer.write_deletion(tombstone)?;
                cursor.advance(tombstone.etag);
            }
            debug!(written = fetched, through = %cursor.position(), "deletion batch");

            if fetched < batch_size {
                break;
            }
        }
        Ok(cursor.position())
    }
}
