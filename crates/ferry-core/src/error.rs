//! Error types for Ferry.
//!
//! This module provides a unified error type for all Ferry operations,
//! with specific error variants for different failure modes.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A specialized `Result` type for Ferry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Ferry.
#[derive(Error, Debug)]
pub enum Error {
    /// Request failed to complete (E101)
    #[error("network error: {0}")]
    Network(String),

    /// Server answered with a non-success status (E102)
    #[error("server rejected request with status {status}: {reason}")]
    ServerRejected {
        /// HTTP status code
        status: u16,
        /// Status text or response body
        reason: String,
    },

    /// Local byte source cannot be read (E103)
    #[error("cannot read source '{}': {reason}", path.display())]
    SourceUnavailable {
        /// Path of the source
        path: PathBuf,
        /// Why it could not be read
        reason: String,
    },

    /// Request was aborted by a user cancellation
    #[error("request aborted")]
    Aborted,

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Invalid file name for a local save
    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The engine task is gone
    #[error("transfer engine is not running")]
    EngineStopped,

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::Network(_) => Some("E101"),
            Self::ServerRejected { .. } => Some("E102"),
            Self::SourceUnavailable { .. } => Some("E103"),
            _ => None,
        }
    }

    /// Returns whether a request that failed with this error may be retried.
    ///
    /// Client errors (4xx) are final; a retry would be rejected the same way.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::ServerRejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns whether this error is the expected outcome of a cancellation.
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            Self::ServerRejected {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            }
        } else if e.is_decode() {
            Self::Serialization(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
