//! Resource repository.

use crate::error::MetadataResult;
use crate::models::ResourceRow;
use async_trait::async_trait;

/// Repository for resource records outside of an assignment.
#[async_trait]
pub trait ResourceRepo: Send + Sync {
    /// Insert a new, unclaimed resource. Fails with `AlreadyExists` if the key is taken.
    async fn create_resource(&self, resource: &ResourceRow) -> MetadataResult<()>;

    /// Get a resource by key, claimed or not.
    async fn get_resource(&self, resource_key: &str) -> MetadataResult<Option<ResourceRow>>;

    /// Get a resource by key only if it is unclaimed.
    async fn find_unclaimed(&self, resource_key: &str) -> MetadataResult<Option<ResourceRow>>;

    /// List unclaimed resources ordered by key.
    async fn list_unclaimed(&self, offset: u64, limit: u64) -> MetadataResult<Vec<ResourceRow>>;

    /// Count unclaimed resources.
    async fn count_unclaimed(&self) -> MetadataResult<u64>;

    /// Count all resources, claimed or not.
    async fn count_resources(&self) -> MetadataResult<u64>;

    /// Delete a resource, only if it is unclaimed.
    ///
    /// Returns `NotFound` when the key is unknown and `Conflict` when the
    /// resource is claimed.
    async fn delete_unclaimed_resource(&self, resource_key: &str) -> MetadataResult<ResourceRow>;
}
