//! Error types for the migration engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for smuggler operations.
pub type SmugglerResult<T> = Result<T, SmugglerError>;

/// Errors that can occur while exporting, importing or purging.
///
/// The engine never retries on its own. Callers inspect the variant (or
/// [`SmugglerError::is_retryable`]) and decide their own retry policy.
#[derive(Debug, Error)]
pub enum SmugglerError {
    /// The source or target store could not be reached.
    #[error("Smuggler encountered a connection problem: {message} (server '{server}')")]
    Connectivity {
        /// Server the connection was attempted against.
        server: String,
        /// Description of the failure.
        message: String,
    },

    /// The named database does not exist; migration never creates it.
    #[error(
        "Smuggler does not support database creation (database '{database}' on server '{server}' must exist before running Smuggler)."
    )]
    DatabaseNotFound {
        /// Name of the missing database.
        database: String,
        /// Server that was asked for it.
        server: String,
    },

    /// A dump, state or manifest file could not be parsed.
    #[error("corrupt input{}: {message}", display_path(.path))]
    CorruptInput {
        /// File that failed to parse, when known.
        path: Option<PathBuf>,
        /// Description of the problem.
        message: String,
    },

    /// A single document or deletion failed to apply to the target.
    #[error("failed to apply '{key}' (etag {etag}){}: {message}", display_path(.path))]
    Apply {
        /// Key of the offending document or deletion.
        key: String,
        /// Source etag of the offending item.
        etag: String,
        /// File the item came from, when known.
        path: Option<PathBuf>,
        /// Description of the failure.
        message: String,
    },

    /// An etag string was malformed.
    #[error("invalid etag '{input}': {message}")]
    Format {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        message: String,
    },

    /// The requested option combination is not supported.
    #[error("invalid options: {message}")]
    InvalidOptions {
        /// Description of the problem.
        message: String,
    },

    /// The run was cancelled between batches.
    #[error("operation cancelled")]
    Cancelled,

    /// Another export or import is already running against the target.
    #[error("another run is already in progress for '{target}'")]
    Busy {
        /// Dump directory or database the run was started against.
        target: String,
    },

    /// Persisted engine state (continuations, status) could not be read or written.
    #[error("state unavailable: {message}")]
    StateUnavailable {
        /// Description of the problem.
        message: String,
    },

    /// Encoding engine output failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn display_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" in {}", p.display()),
        None => String::new(),
    }
}

impl SmugglerError {
    /// Creates a connectivity error.
    pub fn connectivity(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connectivity {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Creates a database-not-found error.
    pub fn database_not_found(database: impl Into<String>, server: impl Into<String>) -> Self {
        Self::DatabaseNotFound {
            database: database.into(),
            server: server.into(),
        }
    }

    /// Creates a corrupt input error without file context.
    pub fn corrupt_input(message: impl Into<String>) -> Self {
        Self::CorruptInput {
            path: None,
            message: message.into(),
        }
    }

    /// Creates a corrupt input error for a specific file.
    pub fn corrupt_file(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CorruptInput {
            path: Some(path.into()),
            message: message.into(),
        }
    }

    /// Creates an apply error for a key/etag pair.
    pub fn apply(key: impl Into<String>, etag: impl ToString, message: impl Into<String>) -> Self {
        Self::Apply {
            key: key.into(),
            etag: etag.to_string(),
            path: None,
            message: message.into(),
        }
    }

    /// Creates an etag format error.
    pub fn format(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Format {
            input: input.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid options error.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }

    /// Creates a busy error.
    pub fn busy(target: impl Into<String>) -> Self {
        Self::Busy {
            target: target.into(),
        }
    }

    /// Creates a state unavailable error.
    pub fn state_unavailable(message: impl Into<String>) -> Self {
        Self::StateUnavailable {
            message: message.into(),
        }
    }

    /// Attaches a file path to errors that carry one.
    #[must_use]
    pub fn in_file(self, file: impl Into<PathBuf>) -> Self {
        match self {
            Self::CorruptInput {
                path: None,
                message,
            } => Self::CorruptInput {
                path: Some(file.into()),
                message,
            },
            Self::Apply {
                key,
                etag,
                path: None,
                message,
            } => Self::Apply {
                key,
                etag,
                path: Some(file.into()),
                message,
            },
            other => other,
        }
    }

    /// Returns true if the caller may retry the whole run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }
}

impl From<serde_json::Error> for SmugglerError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Self::Io(io::Error::new(io::ErrorKind::Other, err))
        } else if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::corrupt_input(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_not_found_message() {
        let err = SmugglerError::database_not_found("DoesNotExist", "http://localhost:8080/");
        assert_eq!(
            err.to_string(),
            "Smuggler does not support database creation (database 'DoesNotExist' on server 'http://localhost:8080/' must exist before running Smuggler)."
        );
    }

    #[test]
    fn connectivity_message_and_retry() {
        let err = SmugglerError::connectivity("http://localhost:8078/", "connection refused");
        assert!(err
            .to_string()
            .contains("Smuggler encountered a connection problem:"));
        assert!(err.is_retryable());
        assert!(!SmugglerError::Cancelled.is_retryable());
        assert!(!SmugglerError::database_not_found("db", "srv").is_retryable());
        assert!(!SmugglerError::busy("dumps").is_retryable());
    }

    #[test]
    fn in_file_attaches_path_once() {
        let err = SmugglerError::apply("users/1", "etag", "boom").in_file("a.incremental-dump");
        assert!(err.to_string().contains("a.incremental-dump"));

        let err = err.in_file("b.incremental-dump");
        assert!(!err.to_string().contains("b.incremental-dump"));
    }

    #[test]
    fn json_syntax_errors_are_corrupt_input() {
        let err: SmugglerError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, SmugglerError::CorruptInput { .. }));
    }
}
