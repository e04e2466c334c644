//! Periodic export command implementation.

use super::connection;
use chrono::Utc;
use smuggler_core::{
    DirectoryConnector, ExportReport, PeriodicExportSetup, PeriodicExporter, PeriodicScheduler,
    SmugglerError, StoreConnector,
};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

/// Runs periodic exports of the store until `run_for_secs` elapses, or
/// forever.
pub fn run(
    root: &Path,
    database: &str,
    setup_path: &Path,
    run_for_secs: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let setup = PeriodicExportSetup::load(setup_path)?;
    let tick = setup
        .tick_interval()
        .ok_or_else(|| SmugglerError::invalid_options("no export interval configured"))?;

    let source = DirectoryConnector::default().open(&connection(root, database))?;
    let exporter = Arc::new(PeriodicExporter::new(source, setup)?);
    info!(
        "Periodic export of {} into {:?} every {:?}",
        database,
        exporter.setup().local_folder_name,
        tick
    );

    // Catch up immediately, then follow the timer.
    if let Some(report) = exporter.tick(Utc::now())? {
        print_report(&report);
    }

    let scheduler = PeriodicScheduler::new(tick);
    let worker = Arc::clone(&exporter);
    scheduler.start(move || {
        if let Some(report) = worker.tick(Utc::now())? {
            print_report(&report);
        }
        Ok(())
    })?;

    match run_for_secs {
        Some(secs) => thread::sleep(Duration::from_secs(secs)),
        None => loop {
            thread::park();
        },
    }
    scheduler.stop();
    println!(
        "✓ Periodic export stopped ({} runs, {} dropped ticks)",
        scheduler.completed_runs(),
        scheduler.dropped_ticks()
    );
    Ok(())
}

fn print_report(report: &ExportReport) {
    println!(
        "✓ {:?} export: {} documents, {} deletions",
        report.kind, report.documents_exported, report.deletions_exported
    );
}
