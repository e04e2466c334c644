//! Connection probing.
//!
//! Every run probes its source or target before streaming starts, so an
//! unreachable server or a missing database is reported before any partial
//! work is done. A probe returns a [`ProbeOutcome`] the caller inspects;
//! [`ProbeOutcome::into_result`] turns it into the matching error kind.

use crate::error::{SmugglerError, SmugglerResult};
use crate::store::{DirectoryStore, DocumentStore, MemoryStore, MemoryStoreConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where a store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Server address. For directory stores this is the root directory.
    pub url: String,
    /// Database name.
    pub database: String,
}

impl ConnectionOptions {
    /// Creates connection options.
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
        }
    }
}

/// Result of probing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The server answered and the database exists.
    Ready,
    /// The server could not be reached.
    Unreachable {
        /// Server that was probed.
        server: String,
        /// Why it could not be reached.
        message: String,
    },
    /// The server answered but the database does not exist.
    DatabaseMissing {
        /// Server that was probed.
        server: String,
        /// Database that was asked for.
        database: String,
    },
}

impl ProbeOutcome {
    /// Returns true for [`ProbeOutcome::Ready`].
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Converts the outcome into `Ok(())` or the matching error.
    pub fn into_result(self) -> SmugglerResult<()> {
        match self {
            Self::Ready => Ok(()),
            Self::Unreachable { server, message } => {
                Err(SmugglerError::connectivity(server, message))
            }
            Self::DatabaseMissing { server, database } => {
                Err(SmugglerError::database_not_found(database, server))
            }
        }
    }
}

/// Opens stores behind a uniform interface, local or remote.
pub trait StoreConnector: Send + Sync {
    /// Checks reachability and database existence without side effects.
    fn probe(&self, options: &ConnectionOptions) -> ProbeOutcome;

    /// Opens the store. Callers go through [`StoreConnector::open`].
    fn connect(&self, options: &ConnectionOptions) -> SmugglerResult<Arc<dyn DocumentStore>>;

    /// Probes, then opens the store.
    fn open(&self, options: &ConnectionOptions) -> SmugglerResult<Arc<dyn DocumentStore>> {
        self.probe(options).into_result()?;
        self.connect(options)
    }
}

/// In-process server hosting named memory stores.
///
/// Used wherever a remote server would be: tests toggle it offline to
/// simulate a dropped connection.
#[derive(Debug)]
pub struct StoreServer {
    url: String,
    online: AtomicBool,
    max_batch_size: usize,
    databases: RwLock<HashMap<String, Arc<MemoryStore>>>,
}

impl StoreServer {
    /// Creates an online server with the default batch ceiling.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            online: AtomicBool::new(true),
            max_batch_size: MemoryStoreConfig::default().max_batch_size,
            databases: RwLock::new(HashMap::new()),
        }
    }

    /// Sets the batch ceiling applied to databases created afterwards.
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Returns the server address.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Creates a database, or returns the existing one with that name.
    pub fn create_database(&self, name: &str) -> Arc<MemoryStore> {
        let mut databases = self.databases.write();
        Arc::clone(databases.entry(name.to_string()).or_insert_with(|| {
            let config = MemoryStoreConfig::new().with_max_batch_size(self.max_batch_size);
            Arc::new(MemoryStore::with_config(name, config))
        }))
    }

    /// Returns a hosted database.
    pub fn database(&self, name: &str) -> Option<Arc<MemoryStore>> {
        self.databases.read().get(name).cloned()
    }

    /// Takes the server on or offline.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Returns true if the server accepts connections.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Returns options addressing `database` on this server.
    pub fn options(&self, database: &str) -> ConnectionOptions {
        ConnectionOptions::new(&self.url, database)
    }
}

impl StoreConnector for StoreServer {
    fn probe(&self, options: &ConnectionOptions) -> ProbeOutcome {
        if options.url != self.url {
            return ProbeOutcome::Unreachable {
                server: options.url.clone(),
                message: "no server is listening at this address".to_string(),
            };
        }
        if !self.is_online() {
            return ProbeOutcome::Unreachable {
                server: options.url.clone(),
                message: "server is offline".to_string(),
            };
        }
        if self.databases.read().contains_key(&options.database) {
            ProbeOutcome::Ready
        } else {
            ProbeOutcome::DatabaseMissing {
                server: options.url.clone(),
                database: options.database.clone(),
            }
        }
    }

    fn connect(&self, options: &ConnectionOptions) -> SmugglerResult<Arc<dyn DocumentStore>> {
        match self.database(&options.database) {
            Some(store) => Ok(store),
            None => Err(SmugglerError::database_not_found(
                &options.database,
                &options.url,
            )),
        }
    }
}

/// Opens [`DirectoryStore`]s. The url is a root directory and each database
/// is a subdirectory of it.
#[derive(Debug, Clone, Default)]
pub struct DirectoryConnector {
    config: MemoryStoreConfig,
}

impl DirectoryConnector {
    /// Creates a connector that opens stores with `config`.
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self { config }
    }
}

impl StoreConnector for DirectoryConnector {
    fn probe(&self, options: &ConnectionOptions) -> ProbeOutcome {
        let root = Path::new(&options.url);
        if !root.is_dir() {
            return ProbeOutcome::Unreachable {
                server: options.url.clone(),
                message: "root directory does not exist".to_string(),
            };
        }
        if DirectoryStore::exists(&root.join(&options.database)) {
            ProbeOutcome::Ready
        } else {
            ProbeOutcome::DatabaseMissing {
                server: options.url.clone(),
                database: options.database.clone(),
            }
        }
    }

    fn connect(&self, options: &ConnectionOptions) -> SmugglerResult<Arc<dyn DocumentStore>> {
        let path = Path::new(&options.url).join(&options.database);
        let store = DirectoryStore::open(&path, self.config.clone())?;
        Ok(Arc::new(store))
    }
}
