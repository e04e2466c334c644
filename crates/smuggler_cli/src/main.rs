//! Smuggler CLI
//!
//! Command-line tools for moving data between document stores.
//!
//! # Commands
//!
//! - `create-store` - Create an empty directory store
//! - `export` - Export a store to a dump file or directory
//! - `import` - Import a dump file or directory into a store
//! - `purge-tombstones` - Drop tombstones up to an etag
//! - `state` - Show the incremental export state of a dump directory
//! - `periodic` - Run periodic exports

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Smuggler command-line migration tools.
#[derive(Parser)]
#[command(name = "smuggler")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the stores
    #[arg(global = true, short, long)]
    root: Option<PathBuf>,

    /// Store name within the root directory
    #[arg(global = true, short, long)]
    database: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty store
    CreateStore,

    /// Export a store
    Export {
        /// Output file, or dump directory
        #[arg(long)]
        to: PathBuf,

        /// Export only changes since the last export into the directory
        #[arg(short, long)]
        incremental: bool,

        /// Requested batch size
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Import a dump into a store
    Import {
        /// Dump file, or dump directory
        #[arg(long)]
        from: PathBuf,

        /// Import a directory of dumps
        #[arg(short, long)]
        incremental: bool,

        /// Requested batch size
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Resume and record progress under this token
        #[arg(long)]
        continuation_token: Option<String>,

        /// Directory for continuation records (default: in memory)
        #[arg(long)]
        continuations: Option<PathBuf>,

        /// Purge consumed tombstones from this store afterwards
        #[arg(long)]
        purge_source: Option<String>,
    },

    /// Drop tombstones with etag at or below the cutoff
    PurgeTombstones {
        /// Cutoff etag
        #[arg(short, long)]
        etag: String,
    },

    /// Show the export state of a dump directory
    State {
        /// Dump directory
        #[arg(long)]
        dir: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run periodic exports
    Periodic {
        /// Periodic export setup (JSON)
        #[arg(short, long)]
        setup: PathBuf,

        /// Stop after this many seconds (default: run until killed)
        #[arg(long)]
        run_for_secs: Option<u64>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::CreateStore => {
            let root = cli.root.ok_or("Store root required for create-store")?;
            let database = cli.database.ok_or("Database name required for create-store")?;
            commands::create_store::run(&root, &database)?;
        }
        Commands::Export {
            to,
            incremental,
            batch_size,
        } => {
            let root = cli.root.ok_or("Store root required for export")?;
            let database = cli.database.ok_or("Database name required for export")?;
            commands::export::run(&root, &database, &to, incremental, batch_size)?;
        }
        Commands::Import {
            from,
            incremental,
            batch_size,
            continuation_token,
            continuations,
            purge_source,
        } => {
            let root = cli.root.ok_or("Store root required for import")?;
            let database = cli.database.ok_or("Database name required for import")?;
            commands::import::run(
                &root,
                &database,
                commands::import::ImportArgs {
                    from,
                    incremental,
                    batch_size,
                    continuation_token,
                    continuations,
                    purge_source,
                },
            )?;
        }
        Commands::PurgeTombstones { etag } => {
            let root = cli.root.ok_or("Store root required for purge-tombstones")?;
            let database = cli
                .database
                .ok_or("Database name required for purge-tombstones")?;
            commands::purge::run(&root, &database, &etag)?;
        }
        Commands::State { dir, format } => {
            commands::state::run(&dir, &format)?;
        }
        Commands::Periodic {
            setup,
            run_for_secs,
        } => {
            let root = cli.root.ok_or("Store root required for periodic")?;
            let database = cli.database.ok_or("Database name required for periodic")?;
            commands::periodic::run(&root, &database, &setup, run_for_secs)?;
        }
        Commands::Version => {
            println!("Smuggler CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Smuggler Core v{}", smuggler_core::VERSION);
        }
    }

    Ok(())
}
