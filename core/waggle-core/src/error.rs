//! Error types for waggle-core operations.
//!
//! Only store failures and namespace resolution failures are errors. A
//! degraded session registry is a normal outcome (see `registry`), and a
//! malformed persisted key is skipped by whoever decodes it.

use std::path::PathBuf;

/// All errors that can reach a caller of waggle-core.
#[derive(Debug, thiserror::Error)]
pub enum WaggleError {
    // ─────────────────────────────────────────────────────────────────────
    // Store Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Failed to connect to database at {}: {source}", path.display())]
    StoreOpen {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Database error: {context}: {source}")]
    Store {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Namespace Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error(
        "No workspace root was provided by the client. \
         Please provide the namespace parameter when calling this tool."
    )]
    NamespaceUnresolved,

    // ─────────────────────────────────────────────────────────────────────
    // Environment Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl WaggleError {
    pub(crate) fn store(context: impl Into<String>, source: rusqlite::Error) -> Self {
        WaggleError::Store {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        WaggleError::Io {
            context: context.into(),
            source,
        }
    }

    /// Short machine-readable category, used as the wire error code.
    pub fn code(&self) -> &'static str {
        match self {
            WaggleError::StoreOpen { .. } | WaggleError::Store { .. } => "store_error",
            WaggleError::NamespaceUnresolved => "namespace_unresolved",
            WaggleError::HomeDirNotFound | WaggleError::Io { .. } => "environment_error",
        }
    }
}

/// Convenience type alias for Results using WaggleError.
pub type Result<T> = std::result::Result<T, WaggleError>;

impl From<WaggleError> for String {
    fn from(err: WaggleError) -> String {
        err.to_string()
    }
}
