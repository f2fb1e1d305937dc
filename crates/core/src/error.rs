//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identity key: {0}")]
    InvalidIdentityKey(String),

    #[error("invalid resource key: {0}")]
    InvalidResourceKey(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
