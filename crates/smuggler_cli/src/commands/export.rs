//! Export command implementation.

use super::connection;
use smuggler_core::{
    DirectoryConnector, ExportDestination, ExportOptions, ExportReport, Smuggler,
};
use std::path::Path;
use std::sync::Arc;

/// Exports the store `database` under `root` to `to`.
///
/// Incremental exports always write into a directory; full exports write a
/// single file unless `to` is an existing directory.
pub fn run(
    root: &Path,
    database: &str,
    to: &Path,
    incremental: bool,
    batch_size: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut options =
        ExportOptions::new(ExportDestination::from_path(to, incremental)).with_incremental(incremental);
    if let Some(size) = batch_size {
        options = options.with_batch_size(size);
    }

    let smuggler = Smuggler::new(Arc::new(DirectoryConnector::default()));
    let report = smuggler.export(&connection(root, database), options)?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &ExportReport) {
    match &report.file_path {
        Some(path) => {
            println!("✓ Export complete");
            println!("  File: {:?}", path);
        }
        None => println!("✓ Nothing to export"),
    }
    println!("  Kind: {:?}", report.kind);
    println!("  Documents: {}", report.documents_exported);
    println!("  Deletions: {}", report.deletions_exported);
    println!("  Last document etag: {}", report.last_etags.documents);
    println!("  Last deletion etag: {}", report.last_etags.deletions);
    println!("  Batch size: {}", report.effective_batch_size);
    println!("  Duration: {:?}", report.duration);
}
