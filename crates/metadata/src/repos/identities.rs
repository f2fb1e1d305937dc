//! Identity repository.

use crate::error::MetadataResult;
use crate::models::IdentityRow;
use async_trait::async_trait;

/// Repository for identity records outside of an assignment.
///
/// Nothing here touches the assignment columns; those only change through
/// an [`AssignmentTx`](super::AssignmentTx).
#[async_trait]
pub trait IdentityRepo: Send + Sync {
    /// Insert a new identity. Fails with `AlreadyExists` if the key is taken.
    async fn create_identity(&self, identity: &IdentityRow) -> MetadataResult<()>;

    /// Insert an identity, or update `full_name`, `registration_no` and
    /// `updated_at` of an existing one. Returns true when a row was inserted.
    async fn upsert_identity(&self, identity: &IdentityRow) -> MetadataResult<bool>;

    /// Get an identity by key.
    async fn get_identity(&self, identity_key: &str) -> MetadataResult<Option<IdentityRow>>;

    /// Count all identities.
    async fn count_identities(&self) -> MetadataResult<u64>;

    /// Count identities that hold a resource.
    async fn count_assigned_identities(&self) -> MetadataResult<u64>;
}
