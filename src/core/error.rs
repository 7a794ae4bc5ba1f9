//! Error types for the terracost library
//!
//! Every failure of the tiled pipeline surfaces as an [`Error`]. Invariant violations
//! (bad tiling, addressing round-trip failures, exhausted or out-of-order streams) carry
//! the expected and actual values so the binary can print them before aborting the run.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for terracost operations
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal contract broken; never recoverable
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Input data the algorithm cannot accept (e.g. a negative cost)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Tile size, memory budget or resolution out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The priority queue reached its configured hard cap
    #[error("Priority queue full: cap of {capacity} entries reached")]
    QueueFull { capacity: usize },

    /// Artifact on disk does not match the expected layout
    #[error("Malformed artifact {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    /// Lock file could not be encoded or decoded
    #[error("Lock file error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// Operation not offered by this storage variant
    #[error("Operation not supported by {0}")]
    Unsupported(&'static str),
}

impl Error {
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::Invariant(msg.into())
    }

    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that indicate a programming or configuration bug rather
    /// than bad input or a failing disk.
    pub fn is_invariant(&self) -> bool {
        matches!(self, Error::Invariant(_) | Error::Format { .. })
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::InvalidConfig(err.to_string())
    }
}

/// Convenience result type for terracost operations
pub type Result<T> = std::result::Result<T, Error>;
