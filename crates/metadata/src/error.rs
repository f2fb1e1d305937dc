//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A conditional update matched no row: the guarded state changed underneath us.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Whether the failure came from an exhausted pool or a cancelled statement.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::PoolTimedOut) => true,
            // PostgreSQL query_canceled, raised when statement_timeout fires.
            Self::Database(sqlx::Error::Database(db_err)) => {
                db_err.code().as_deref() == Some("57014")
            }
            _ => false,
        }
    }
}

/// Map a unique-index violation to `AlreadyExists`, passing other errors through.
pub(crate) fn map_unique_violation(
    err: sqlx::Error,
    what: impl FnOnce() -> String,
) -> MetadataError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            MetadataError::AlreadyExists(what())
        }
        _ => MetadataError::Database(err),
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
