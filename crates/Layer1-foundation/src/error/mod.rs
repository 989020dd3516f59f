//! Error types for SysRow
//!
//! Every library operation reports failures through [`Error`]. Filesystem
//! failures keep the underlying `std::io::Error` as their source so callers
//! can inspect the cause.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// SysRow error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Storage
    // ========================================================================
    #[error("IO error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt record {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    // ========================================================================
    // Task lifecycle
    // ========================================================================
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Failed to start process for task {task_id}: {source}")]
    ProcessStart {
        task_id: String,
        #[source]
        source: std::io::Error,
    },

    // ========================================================================
    // General
    // ========================================================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap an IO failure with a short description of what was attempted
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// IO failure on a specific path. A missing file becomes [`Error::NotFound`].
    pub fn from_path(action: &str, path: &std::path::Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path.display().to_string())
        } else {
            Error::io(format!("{} {}", action, path.display()), source)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Errors caused by the caller's input rather than the environment
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::Duplicate(_)
                | Error::InvalidState(_)
                | Error::InvalidInput(_)
        )
    }
}
