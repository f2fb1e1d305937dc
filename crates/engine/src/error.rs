//! Assignment error types.

use portrait_metadata::MetadataError;
use portrait_storage::StorageError;
use serde::Serialize;

/// Coarse error taxonomy shared by every engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    ResourceUnavailable,
    MaterializationFailed,
    Timeout,
    Cancelled,
    Internal,
}

/// Engine operation errors.
#[derive(Debug, thiserror::Error)]
pub enum AssignError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("identity not found: {0}")]
    IdentityNotFound(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("identity already has a resource: {0}")]
    AlreadyAssigned(String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("nothing assigned to identity: {0}")]
    NothingAssigned(String),

    #[error("resource is claimed: {0}")]
    ResourceClaimed(String),

    #[error("already registered: {0}")]
    Duplicate(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("materialization failed: {0}")]
    MaterializationFailed(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AssignError {
    /// Coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::IdentityNotFound(_) | Self::ResourceNotFound(_) | Self::NothingAssigned(_) => {
                ErrorKind::NotFound
            }
            Self::AlreadyAssigned(_)
            | Self::ResourceClaimed(_)
            | Self::Duplicate(_)
            | Self::Conflict(_) => ErrorKind::Conflict,
            Self::ResourceUnavailable(_) => ErrorKind::ResourceUnavailable,
            Self::MaterializationFailed(_) => ErrorKind::MaterializationFailed,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::IdentityNotFound(_) => "identity_not_found",
            Self::ResourceNotFound(_) => "resource_not_found",
            Self::AlreadyAssigned(_) => "already_assigned",
            Self::ResourceUnavailable(_) => "resource_unavailable",
            Self::NothingAssigned(_) => "nothing_assigned",
            Self::ResourceClaimed(_) => "resource_claimed",
            Self::Duplicate(_) => "duplicate",
            Self::Conflict(_) => "conflict",
            Self::MaterializationFailed(_) => "materialization_failed",
            Self::Timeout(_) => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the same request may succeed if simply tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Timeout(_))
    }
}

impl From<portrait_core::Error> for AssignError {
    fn from(err: portrait_core::Error) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<MetadataError> for AssignError {
    fn from(err: MetadataError) -> Self {
        if err.is_timeout() {
            return Self::Timeout(err.to_string());
        }
        match err {
            MetadataError::Conflict(msg) | MetadataError::Constraint(msg) => Self::Conflict(msg),
            MetadataError::AlreadyExists(msg) => Self::Duplicate(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<StorageError> for AssignError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SourceMissing(_)
            | StorageError::DestinationExists(_)
            | StorageError::DestinationWriteFailed { .. } => {
                Self::MaterializationFailed(err.to_string())
            }
            StorageError::InvalidKey(msg) => Self::InvalidInput(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Result type for engine operations.
pub type AssignResult<T> = std::result::Result<T, AssignError>;
