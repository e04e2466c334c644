//! # Smuggler Testkit
//!
//! Test utilities for Smuggler.
//!
//! This crate provides:
//! - Seeded stores and temporary dump directories
//! - Property-based generators for etags, keys and write workloads
//! - A source/target migration harness with convergence checks
//! - Concurrent write-while-export stress runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use smuggler_testkit::prelude::*;
//!
//! #[test]
//! fn migrates() {
//!     let harness = MigrationHarness::new();
//!     put_users(harness.source(), 1..=10);
//!     harness.export_incremental().unwrap();
//!     harness.import(None, None).unwrap();
//!     harness.assert_converged();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod harness;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use harness::*;
pub use stress::*;
