//! Write-while-export stress runs.
//!
//! Writers keep updating and deleting documents while incremental exports
//! run back to back, which exercises the per-batch ceiling of the export
//! scan. After the writers stop, one final export catches up.

use crate::fixtures::{user_doc, user_key};
use serde_json::Map;
use smuggler_core::dump::{list_dump_files, read_dump};
use smuggler_core::{DocumentStore, ExportOptions, ExportPipeline, MemoryStore, SmugglerResult};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for a stress run.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Concurrent writer threads.
    pub writers: usize,
    /// Writes per writer.
    pub writes_per_writer: usize,
    /// Keys each writer cycles through.
    pub keyspace: usize,
    /// Export batch size.
    pub batch_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            writers: 4,
            writes_per_writer: 500,
            keyspace: 64,
            batch_size: 32,
        }
    }
}

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressResult {
    /// Writes performed by all writers.
    pub writes: usize,
    /// Export runs completed.
    pub exports: usize,
    /// Dump files written.
    pub files: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressResult {
    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Writes: {}", self.writes);
        println!("Exports: {}", self.exports);
        println!("Files: {}", self.files);
        println!("Duration: {:?}", self.duration);
    }
}

/// Runs writers against `store` while exporting incrementally into `dir`.
pub fn export_under_load(
    store: &Arc<MemoryStore>,
    dir: &Path,
    config: &StressConfig,
) -> SmugglerResult<StressResult> {
    let start = Instant::now();
    let done = Arc::new(AtomicBool::new(false));
    let writes = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..config.writers)
        .map(|writer| {
            let store = Arc::clone(store);
            let writes = Arc::clone(&writes);
            let config = config.clone();
            thread::spawn(move || {
                for i in 0..config.writes_per_writer {
                    let key = user_key(writer * config.keyspace + i % config.keyspace);
                    if i % 7 == 6 {
                        store.delete_if_exists(&key).expect("delete");
                    } else {
                        store.put(&key, user_doc(i), Map::new()).expect("put");
                    }
                    writes.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    let options = ExportOptions::incremental(dir).with_batch_size(config.batch_size);
    let mut exports = 0;
    let watcher = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for handle in handles {
                handle.join().expect("writer panicked");
            }
            done.store(true, Ordering::SeqCst);
        })
    };
    while !done.load(Ordering::SeqCst) {
        ExportPipeline::new(store.clone(), options.clone()).run()?;
        exports += 1;
    }
    watcher.join().expect("watcher panicked");
    ExportPipeline::new(store.clone(), options).run()?;
    exports += 1;

    Ok(StressResult {
        writes: writes.load(Ordering::Relaxed),
        exports,
        files: list_dump_files(dir)?.len(),
        duration: start.elapsed(),
    })
}

/// Asserts that every file in `dir` lists documents and deletions in
/// strictly increasing etag order, and that files never overlap.
pub fn assert_monotonic_dumps(dir: &Path) -> SmugglerResult<()> {
    let mut last_doc = smuggler_core::Etag::EMPTY;
    let mut last_deletion = smuggler_core::Etag::EMPTY;
    for path in list_dump_files(dir)? {
        let contents = read_dump(&path)?;
        for document in &contents.documents {
            assert!(
                document.etag > last_doc,
                "{:?}: document etag {} not above {}",
                path,
                document.etag,
                last_doc
            );
            last_doc = document.etag;
        }
        for deletion in &contents.deletions {
            assert!(
                deletion.etag > last_deletion,
                "{:?}: deletion etag {} not above {}",
                path,
                deletion.etag,
                last_deletion
            );
            last_deletion = deletion.etag;
        }
    }
    Ok(())
}
