//! Assignment unit of work.

use crate::error::MetadataResult;
use crate::models::{IdentityRow, ResourceRow};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository that opens assignment transactions.
#[async_trait]
pub trait AssignmentRepo: Send + Sync {
    /// Begin a unit of work over the identity and resource tables.
    async fn begin_assignment(&self) -> MetadataResult<Box<dyn AssignmentTx>>;
}

/// An open transaction over identities and resources.
///
/// Every read and write issued through this handle sees the same snapshot and
/// becomes visible only on [`commit`](AssignmentTx::commit). Dropping the
/// handle without committing rolls everything back.
#[async_trait]
pub trait AssignmentTx: Send {
    /// Read an identity. On PostgreSQL the row stays locked until the
    /// transaction ends.
    async fn find_identity(&mut self, identity_key: &str) -> MetadataResult<Option<IdentityRow>>;

    /// Read a resource, claimed or not.
    async fn find_resource(&mut self, resource_key: &str) -> MetadataResult<Option<ResourceRow>>;

    /// Claim a resource if and only if it is unclaimed.
    ///
    /// Returns `Conflict` when no unclaimed row matched, which covers both a
    /// concurrent claim and a resource that disappeared.
    async fn claim_resource(
        &mut self,
        resource_key: &str,
        claimed_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Mark a claimed resource unclaimed again and clear `claimed_at`.
    async fn release_resource(&mut self, resource_key: &str) -> MetadataResult<()>;

    /// Whether any identity already records `photo_path`.
    async fn photo_path_in_use(&mut self, photo_path: &str) -> MetadataResult<bool>;

    /// Link an unassigned identity to a claimed resource.
    ///
    /// Returns `Conflict` when the identity is missing or already linked and
    /// `Constraint` when the resource or path is recorded on another identity.
    async fn link_resource(
        &mut self,
        identity_key: &str,
        resource_key: &str,
        photo_path: &str,
        assigned_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Clear the assignment columns of an identity.
    async fn unlink_resource(&mut self, identity_key: &str) -> MetadataResult<()>;

    /// Delete an identity row.
    async fn delete_identity(&mut self, identity_key: &str) -> MetadataResult<()>;

    /// Make every change visible atomically.
    async fn commit(self: Box<Self>) -> MetadataResult<()>;

    /// Discard every change.
    async fn rollback(self: Box<Self>) -> MetadataResult<()>;
}
