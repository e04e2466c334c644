//! # Smuggler Core
//!
//! Incremental change migration between document stores.
//!
//! This crate provides:
//! - Etags and the per-run sequence cursor
//! - Tombstone ledger for deleted keys
//! - Export pipeline writing full and incremental dumps
//! - Import pipeline with continuation tokens for resumable transfers
//! - Periodic export driven by a wall-clock scheduler
//! - Store collaborator traits with memory and directory-backed stores
//!
//! ## Architecture
//!
//! Every write to a store receives an etag from one store-wide generator.
//! An export reads documents and tombstones in etag order above the
//! positions recorded by the previous run, and writes them as a dump. An
//! import replays dumps into another store, which issues its own etags.
//!
//! ## Key Invariants
//!
//! - Within a dump, document etags and deletion etags each strictly increase
//! - Export state is written only after the dump is complete
//! - Applying a document or deletion twice has the same effect as once
//! - A tombstone is purged only once its deletion has been exported
//! - Migration never creates a database

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod config;
mod connection;
mod continuation;
mod cursor;
pub mod dump;
mod engine;
mod error;
mod etag;
mod export;
mod files;
mod governor;
mod import;
mod periodic;
mod state;
pub mod store;
mod tombstones;

pub use cancel::CancelHandle;
pub use config::{ExportDestination, ExportOptions, ImportOptions, ImportSource, PeriodicExportSetup};
pub use connection::{ConnectionOptions, DirectoryConnector, ProbeOutcome, StoreConnector, StoreServer};
pub use continuation::{
    ContinuationRecord, ContinuationStore, ContinuationTracker, DirectoryContinuationStore,
    FileProgress, MemoryContinuationStore,
};
pub use cursor::SequenceCursor;
pub use dump::{DumpKind, DumpManifest, DumpSummary, DumpWriter};
pub use engine::Smuggler;
pub use error::{SmugglerError, SmugglerResult};
pub use etag::{Etag, EtagPair};
pub use export::{ExportPhase, ExportPipeline, ExportReport};
pub use governor::{BatchSizeConfig, BatchSizeGovernor};
pub use import::{ImportPipeline, ImportReport};
pub use periodic::{PeriodicExportStatus, PeriodicExporter, PeriodicScheduler};
pub use state::{LoadedState, OperationState};
pub use store::{DirectoryStore, DocumentRecord, DocumentStore, MemoryStore, MemoryStoreConfig};
pub use tombstones::{Tombstone, TombstoneLedger};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
