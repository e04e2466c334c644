//! Import command implementation.

use super::connection;
use smuggler_core::{
    ContinuationTracker, DirectoryConnector, DirectoryContinuationStore, ImportOptions,
    ImportReport, ImportSource, Smuggler,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Arguments of the import command.
#[derive(Debug, Default)]
pub struct ImportArgs {
    /// Dump file or directory.
    pub from: PathBuf,
    /// Import a directory of dumps.
    pub incremental: bool,
    /// Requested batch size.
    pub batch_size: Option<usize>,
    /// Continuation token.
    pub continuation_token: Option<String>,
    /// Directory for continuation records.
    pub continuations: Option<PathBuf>,
    /// Store under the same root to purge consumed tombstones from.
    pub purge_source: Option<String>,
}

/// Imports `args.from` into the store `database` under `root`.
pub fn run(root: &Path, database: &str, args: ImportArgs) -> Result<(), Box<dyn std::error::Error>> {
    let source = ImportSource::from_path(&args.from, args.incremental)?;
    let mut options = ImportOptions::new(source);
    if let Some(size) = args.batch_size {
        options = options.with_batch_size(size);
    }
    if let Some(token) = args.continuation_token {
        options = options.with_continuation_token(token);
    }
    if let Some(name) = &args.purge_source {
        options = options.with_purge_source(connection(root, name));
    }

    let tracker = match &args.continuations {
        Some(dir) => ContinuationTracker::new(Arc::new(DirectoryContinuationStore::open(dir)?)),
        None => ContinuationTracker::in_memory(),
    };

    let smuggler = Smuggler::new(Arc::new(DirectoryConnector::default()));
    let report = smuggler.import(&connection(root, database), options, Arc::new(tracker))?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &ImportReport) {
    println!("✓ Import complete");
    println!(
        "  Files: {} applied, {} skipped",
        report.files_applied, report.files_skipped
    );
    for path in &report.corrupt_files {
        println!("  ✗ Corrupt file not applied: {:?}", path);
    }
    println!(
        "  Documents: {} applied, {} skipped",
        report.documents_applied, report.documents_skipped
    );
    println!(
        "  Deletions: {} applied, {} skipped",
        report.deletions_applied, report.deletions_skipped
    );
    if report.tombstones_purged > 0 {
        println!("  Source tombstones purged: {}", report.tombstones_purged);
    }
    println!("  Batch size: {}", report.effective_batch_size);
    println!("  Duration: {:?}", report.duration);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn directory_without_incremental_is_rejected() {
        let dir = tempdir().unwrap();
        super::super::create_store::run(dir.path(), "Target").unwrap();
        let dumps = dir.path().join("dumps");
        std::fs::create_dir_all(&dumps).unwrap();

        let err = run(
            dir.path(),
            "Target",
            ImportArgs {
                from: dumps,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("imported incrementally"));
    }

    #[test]
    fn export_then_import_with_persistent_token() {
        let dir = tempdir().unwrap();
        super::super::create_store::run(dir.path(), "Source").unwrap();
        super::super::create_store::run(dir.path(), "Target").unwrap();
        let dumps = dir.path().join("dumps");
        super::super::export::run(dir.path(), "Source", &dumps, true, None).unwrap();

        let args = || ImportArgs {
            from: dumps.clone(),
            incremental: true,
            continuation_token: Some("nightly".to_string()),
            continuations: Some(dir.path().join("continuations")),
            ..Default::default()
        };
        run(dir.path(), "Target", args()).unwrap();
        run(dir.path(), "Target", args()).unwrap();
    }
}
