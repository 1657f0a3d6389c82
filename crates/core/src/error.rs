//! Error types for dumpcycle
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! The variants follow the failure classes the producer and the rotation
//! coordinator react to differently:
//!
//! - `Configuration`: fatal at startup, never retried
//! - `Capture`: the tick is abandoned, state is left untouched
//! - `Persistence`: the cycle pointer could not be made durable
//! - `Split` / `Verify`: the rotation is marked failed, inputs are preserved

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for dumpcycle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for dumpcycle
#[derive(Debug, Error)]
pub enum Error {
    /// Missing engine binaries, invalid connection parameters, bad config file
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The dump engine failed while producing a capture
    #[error("Capture failed during {operation}: {message}")]
    Capture {
        /// Engine operation that failed (e.g. "full snapshot")
        operation: &'static str,
        /// Engine-reported detail
        message: String,
    },

    /// The cycle state could not be written durably
    #[error("Persistence error at {}: {source}", path.display())]
    Persistence {
        /// File that could not be written or removed
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// On-disk data could not be decoded
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Splitting the artifact into parts failed
    #[error("Split error: {0}")]
    Split(String),

    /// The written parts do not account for the artifact
    #[error("Verification failed: {0}")]
    Verify(String),

    /// I/O error (file operations, process spawning, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Build a capture error for the named engine operation.
    pub fn capture(operation: &'static str, message: impl Into<String>) -> Self {
        Error::Capture {
            operation,
            message: message.into(),
        }
    }

    /// Build a persistence error for a state write against `path`.
    pub fn persistence(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Build a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// Whether this failure can leave the cycle pointer out of step with the
    /// artifact. Such failures are always reported as critical, whatever the
    /// producer's error policy.
    pub fn is_critical(&self) -> bool {
        matches!(self, Error::Persistence { .. })
    }

    /// Whether retrying can never succeed without operator action.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
