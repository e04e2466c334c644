//! Periodic export.
//!
//! [`PeriodicExporter`] decides, from wall-clock time and the status file it
//! keeps in the dump directory, whether a tick should run a full export, an
//! incremental one, or nothing. The status is persisted, so a restarted
//! process does not repeat a full backup it already made.
//!
//! [`PeriodicScheduler`] is the timer that drives it. The scheduler owns one
//! worker thread; callers own the scheduler and stop it explicitly (or by
//! dropping it).

use crate::config::{ExportDestination, ExportOptions, PeriodicExportSetup};
use crate::dump::DumpKind;
use crate::error::{SmugglerError, SmugglerResult};
use crate::etag::{Etag, EtagPair};
use crate::export::{ExportPipeline, ExportReport};
use crate::files::write_atomic;
use crate::store::DocumentStore;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Name of the status file inside the periodic dump directory.
pub const STATUS_FILE: &str = "PeriodicExport.status.json";

/// What the last periodic runs did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeriodicExportStatus {
    /// When the last export of either kind ran.
    #[serde(default)]
    pub last_backup: Option<DateTime<Utc>>,
    /// When the last full export ran.
    #[serde(default)]
    pub last_full_backup: Option<DateTime<Utc>>,
    /// Document position after the last export.
    #[serde(default)]
    pub last_docs_etag: Etag,
    /// Deletion position after the last export.
    #[serde(default)]
    pub last_docs_deletion_etag: Etag,
}

impl PeriodicExportStatus {
    /// Returns the status file path for a dump directory.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(STATUS_FILE)
    }

    /// Loads the status of `dir`; a missing file is a fresh status.
    pub fn load(dir: &Path) -> SmugglerResult<Self> {
        let path = Self::path_in(dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read(&path)?;
        serde_json::from_slice(&data).map_err(|e| SmugglerError::corrupt_file(&path, e.to_string()))
    }

    /// Atomically writes the status into `dir`.
    pub fn save(&self, dir: &Path) -> SmugglerResult<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| SmugglerError::Serialization(e.to_string()))?;
        write_atomic(&Self::path_in(dir), &data)
    }

    /// Both stream positions.
    pub fn last_etags(&self) -> EtagPair {
        EtagPair::new(self.last_docs_etag, self.last_docs_deletion_etag)
    }

    /// Decides what a tick at `now` should run under `setup`.
    ///
    /// The first run is always full. After that a full run is due when the
    /// full interval has elapsed since the last full run; otherwise an
    /// incremental run is due when the incremental interval has elapsed
    /// since the last run of either kind.
    pub fn due(&self, setup: &PeriodicExportSetup, now: DateTime<Utc>) -> Option<DumpKind> {
        let Some(last_full) = self.last_full_backup else {
            return Some(DumpKind::Full);
        };
        if elapsed(last_full, now, setup.full_backup_interval()) {
            return Some(DumpKind::Full);
        }
        let last = self.last_backup.unwrap_or(last_full);
        if elapsed(last, now, setup.interval()) {
            return Some(DumpKind::Incremental);
        }
        None
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>, interval: Option<Duration>) -> bool {
    let Some(interval) = interval else {
        return false;
    };
    match (now - since).to_std() {
        Ok(gap) => gap >= interval,
        // Clock went backwards.
        Err(_) => false,
    }
}

/// Runs due exports of one store into one directory.
pub struct PeriodicExporter {
    source: Arc<dyn DocumentStore>,
    setup: PeriodicExportSetup,
}

impl std::fmt::Debug for PeriodicExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicExporter")
            .field("source", &self.source.name())
            .field("setup", &self.setup)
            .finish()
    }
}

impl PeriodicExporter {
    /// Creates an exporter. Fails if `setup` would never export anything.
    pub fn new(source: Arc<dyn DocumentStore>, setup: PeriodicExportSetup) -> SmugglerResult<Self> {
        setup.validate()?;
        Ok(Self { source, setup })
    }

    /// The setup in use.
    pub fn setup(&self) -> &PeriodicExportSetup {
        &self.setup
    }

    /// Current persisted status.
    pub fn status(&self) -> SmugglerResult<PeriodicExportStatus> {
        PeriodicExportStatus::load(&self.setup.local_folder_name)
    }

    /// Runs whatever export is due at `now`.
    ///
    /// Returns `None` when nothing was due. After an export the status is
    /// persisted first, then source tombstones up to the exported deletion
    /// position are purged.
    pub fn tick(&self, now: DateTime<Utc>) -> SmugglerResult<Option<ExportReport>> {
        let folder = &self.setup.local_folder_name;
        let mut status = PeriodicExportStatus::load(folder)?;
        let Some(kind) = status.due(&self.setup, now) else {
            debug!("no periodic export due");
            return Ok(None);
        };
        info!(?kind, folder = %folder.display(), "periodic export due");

        fs::create_dir_all(folder)?;
        let mut options = ExportOptions::new(ExportDestination::Directory(folder.clone()))
            .with_incremental(kind == DumpKind::Incremental);
        if let Some(size) = self.setup.batch_size {
            options = options.with_batch_size(size);
        }
        let report = ExportPipeline::new(self.source.clone(), options).run()?;

        status.last_backup = Some(now);
        if kind == DumpKind::Full {
            status.last_full_backup = Some(now);
        }
        status.last_docs_etag = report.last_etags.documents;
        status.last_docs_deletion_etag = report.last_etags.deletions;
        status.save(folder)?;

        if !status.last_docs_deletion_etag.is_empty() {
            let purged = self.source.purge_tombstones(status.last_docs_deletion_etag)?;
            self.source.flush()?;
            if purged > 0 {
                info!(purged, up_to = %status.last_docs_deletion_etag, "purged exported tombstones");
            }
        }
        Ok(Some(report))
    }
}

type TickCallback = Arc<dyn Fn() -> SmugglerResult<()> + Send + Sync>;

#[derive(Default)]
struct TimerState {
    stopped: bool,
    deferred: bool,
}

struct SchedulerShared {
    state: Mutex<TimerState>,
    wake: Condvar,
    callback: Mutex<Option<TickCallback>>,
    running: AtomicBool,
    dropped: AtomicU64,
    completed: AtomicU64,
    last_deferral: Mutex<Option<Instant>>,
}

impl SchedulerShared {
    /// Runs the callback unless a run is already in progress.
    fn fire(&self) -> bool {
        let Some(callback) = self.callback.lock().clone() else {
            return false;
        };
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(dropped, "tick dropped, previous run still in progress");
            return false;
        }
        if let Err(err) = callback() {
            warn!(error = %err, "periodic run failed");
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.running.store(false, Ordering::Release);
        true
    }
}

/// Timer that calls a callback every interval.
///
/// A tick that arrives while the previous call is still running is dropped
/// and counted, never queued. [`PeriodicScheduler::defer`] pushes the next
/// tick a full interval into the future.
pub struct PeriodicScheduler {
    interval: Duration,
    shared: Arc<SchedulerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PeriodicScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicScheduler")
            .field("interval", &self.interval)
            .field("started", &self.is_started())
            .field("dropped_ticks", &self.dropped_ticks())
            .finish()
    }
}

impl PeriodicScheduler {
    /// Creates a stopped scheduler.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            shared: Arc::new(SchedulerShared {
                state: Mutex::new(TimerState::default()),
                wake: Condvar::new(),
                callback: Mutex::new(None),
                running: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                last_deferral: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Tick interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts calling `callback` every interval on a worker thread.
    pub fn start<F>(&self, callback: F) -> SmugglerResult<()>
    where
        F: Fn() -> SmugglerResult<()> + Send + Sync + 'static,
    {
        if self.interval.is_zero() {
            return Err(SmugglerError::invalid_options("scheduler interval must be positive"));
        }
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(SmugglerError::invalid_options("scheduler already started"));
        }
        *self.shared.callback.lock() = Some(Arc::new(callback));
        self.shared.state.lock().stopped = false;

        let shared = self.shared.clone();
        let interval = self.interval;
        let handle = thread::Builder::new()
            .name("smuggler-periodic".to_string())
            .spawn(move || run_timer(&shared, interval))?;
        *worker = Some(handle);
        debug!(interval_ms = interval.as_millis() as u64, "scheduler started");
        Ok(())
    }

    /// Postpones the next tick by a full interval from now.
    pub fn defer(&self) {
        *self.shared.last_deferral.lock() = Some(Instant::now());
        let mut state = self.shared.state.lock();
        state.deferred = true;
        self.shared.wake.notify_one();
    }

    /// Time since the last [`PeriodicScheduler::defer`], if any.
    pub fn time_since_last_deferral(&self) -> Option<Duration> {
        self.shared.last_deferral.lock().map(|at| at.elapsed())
    }

    /// Runs the callback now on the calling thread.
    ///
    /// Returns false if the scheduler has no callback or a run is already in
    /// progress; the latter counts as a dropped tick.
    pub fn trigger(&self) -> bool {
        self.shared.fire()
    }

    /// Stops the worker and waits for an in-progress run to finish.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("periodic scheduler worker panicked");
            }
            debug!("scheduler stopped");
        }
    }

    /// Returns true between `start` and `stop`.
    pub fn is_started(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Returns true while the callback is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Ticks dropped because a run was in progress.
    pub fn dropped_ticks(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Callback runs completed, successful or not.
    pub fn completed_runs(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_timer(shared: &SchedulerShared, interval: Duration) {
    let mut state = shared.state.lock();
    loop {
        if state.stopped {
            return;
        }
        let timed_out = shared.wake.wait_for(&mut state, interval).timed_out();
        if state.stopped {
            return;
        }
        if state.deferred {
            state.deferred = false;
            continue;
        }
        if timed_out {
            parking_lot::MutexGuard::unlocked(&mut state, || {
                shared.fire();
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::list_dump_files;
    use crate::state::OperationState;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use serde_json::{json, Map};
    use std::sync::mpsc;
    use tempfile::tempdir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn setup(dir: &Path) -> PeriodicExportSetup {
        PeriodicExportSetup::new(dir)
            .with_interval(Duration::from_secs(60))
            .with_full_backup_interval(Duration::from_secs(3600))
    }

    #[test]
    fn due_decisions() {
        let setup = setup(Path::new("/b"));
        let mut status = PeriodicExportStatus::default();
        assert_eq!(status.due(&setup, at(0)), Some(DumpKind::Full));

        status.last_full_backup = Some(at(0));
        status.last_backup = Some(at(0));
        assert_eq!(status.due(&setup, at(30)), None);
        assert_eq!(status.due(&setup, at(60)), Some(DumpKind::Incremental));
        assert_eq!(status.due(&setup, at(3600)), Some(DumpKind::Full));
        assert_eq!(status.due(&setup, at(-10)), None);
    }

    #[test]
    fn incremental_disabled_only_runs_full() {
        let setup = PeriodicExportSetup::new("/b").with_full_backup_interval(Duration::from_secs(10));
        let status = PeriodicExportStatus {
            last_backup: Some(at(0)),
            last_full_backup: Some(at(0)),
            ..Default::default()
        };
        assert_eq!(status.due(&setup, at(5)), None);
        assert_eq!(status.due(&setup, at(10)), Some(DumpKind::Full));
    }

    #[test]
    fn tick_runs_full_then_incremental_and_purges() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new("Source"));
        store.put("users/1", json!({"Name": "oren"}), Map::new()).unwrap();
        store.put("users/2", json!({"Name": "ayende"}), Map::new()).unwrap();
        let exporter = PeriodicExporter::new(store.clone(), setup(dir.path())).unwrap();

        let first = exporter.tick(at(0)).unwrap().unwrap();
        assert_eq!(first.kind, DumpKind::Full);
        assert!(exporter.tick(at(10)).unwrap().is_none());

        store.delete_if_exists("users/1").unwrap();
        let second = exporter.tick(at(60)).unwrap().unwrap();
        assert_eq!(second.kind, DumpKind::Incremental);
        assert_eq!(second.deletions_exported, 1);
        assert!(store.read_tombstones(Etag::EMPTY, None, 10).unwrap().is_empty());

        let status = exporter.status().unwrap();
        assert_eq!(status.last_full_backup, Some(at(0)));
        assert_eq!(status.last_backup, Some(at(60)));
        assert_eq!(status.last_etags(), second.last_etags);
        let state = OperationState::load(dir.path()).unwrap().unwrap();
        assert_eq!(state.state.last_etags(), second.last_etags);
        assert_eq!(list_dump_files(dir.path()).unwrap().len(), 2);
    }

    #[test]
    fn restart_does_not_repeat_full_backup() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new("Source"));
        store.put("users/1", json!({}), Map::new()).unwrap();
        PeriodicExporter::new(store.clone(), setup(dir.path()))
            .unwrap()
            .tick(at(0))
            .unwrap();

        let restarted = PeriodicExporter::new(store, setup(dir.path())).unwrap();
        assert!(restarted.tick(at(30)).unwrap().is_none());
    }

    #[test]
    fn setup_without_intervals_is_rejected() {
        let store = Arc::new(MemoryStore::new("Source"));
        let err = PeriodicExporter::new(store, PeriodicExportSetup::new("/b")).unwrap_err();
        assert!(matches!(err, SmugglerError::InvalidOptions { .. }));
    }

    #[test]
    fn scheduler_ticks_until_stopped() {
        let scheduler = PeriodicScheduler::new(Duration::from_millis(10));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        scheduler
            .start(move || {
                let _ = tx.lock().send(());
                Ok(())
            })
            .unwrap();

        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        scheduler.stop();
        assert!(!scheduler.is_started());
        assert!(scheduler.completed_runs() >= 3);
    }

    #[test]
    fn start_twice_fails() {
        let scheduler = PeriodicScheduler::new(Duration::from_secs(60));
        scheduler.start(|| Ok(())).unwrap();
        assert!(scheduler.start(|| Ok(())).is_err());
    }

    #[test]
    fn overlapping_tick_is_dropped() {
        let scheduler = Arc::new(PeriodicScheduler::new(Duration::from_secs(3600)));
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);
        scheduler
            .start(move || {
                let _ = entered_tx.lock().send(());
                let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
                Ok(())
            })
            .unwrap();

        let background = {
            let scheduler = scheduler.clone();
            thread::spawn(move || scheduler.trigger())
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(scheduler.is_running());
        assert!(!scheduler.trigger());
        assert_eq!(scheduler.dropped_ticks(), 1);

        release_tx.send(()).unwrap();
        assert!(background.join().unwrap());
        assert_eq!(scheduler.completed_runs(), 1);
    }

    #[test]
    fn defer_postpones_tick() {
        let scheduler = PeriodicScheduler::new(Duration::from_millis(200));
        assert!(scheduler.time_since_last_deferral().is_none());
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        scheduler
            .start(move || {
                let _ = tx.lock().send(Instant::now());
                Ok(())
            })
            .unwrap();

        let started = Instant::now();
        thread::sleep(Duration::from_millis(100));
        scheduler.defer();
        let fired_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired_at.duration_since(started) >= Duration::from_millis(250));
        assert!(scheduler.time_since_last_deferral().is_some());
    }

    #[test]
    fn failing_callback_keeps_ticking() {
        let scheduler = PeriodicScheduler::new(Duration::from_millis(10));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        scheduler
            .start(move || {
                let _ = tx.lock().send(());
                Err(SmugglerError::connectivity("http://a", "down"))
            })
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
