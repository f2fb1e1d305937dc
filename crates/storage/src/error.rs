//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The source of a copy is absent or is not a regular file.
    #[error("source missing: {0}")]
    SourceMissing(String),

    /// The destination of a copy already exists; it is never overwritten.
    #[error("destination exists: {0}")]
    DestinationExists(String),

    /// Writing the destination failed; any partial file has been removed.
    #[error("destination write failed for {path}: {source}")]
    DestinationWriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
