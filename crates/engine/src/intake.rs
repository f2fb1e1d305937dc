//! Producer operations: register identities and resources, delete resources.

use crate::engine::Engine;
use crate::error::{AssignError, AssignResult};
use crate::timeout::{bounded, within};
use portrait_core::filename::{content_type_for, extension_of, join_storage_path};
use portrait_core::{IdentityKey, ResourceKey};
use portrait_metadata::MetadataError;
use portrait_metadata::models::{IdentityRow, ResourceRow};
use portrait_storage::StorageError;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::instrument;

/// Outcome of [`Engine::register_identity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredIdentity {
    pub identity_key: String,
    /// False when an existing identity had its display attributes updated.
    pub created: bool,
}

/// Outcome of [`Engine::register_resource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredResource {
    pub resource_key: String,
    pub path: String,
    pub file_size: u64,
    pub content_type: String,
}

impl Engine {
    /// Create an identity, or update the name and registration code of an
    /// existing one. Assignment state is never touched.
    #[instrument(skip(self, full_name, registration_no))]
    pub async fn register_identity(
        &self,
        identity_key: &str,
        full_name: &str,
        registration_no: Option<&str>,
    ) -> AssignResult<RegisteredIdentity> {
        let identity = IdentityKey::parse(identity_key)?;
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(AssignError::InvalidInput(
                "full name must not be empty".to_string(),
            ));
        }
        let registration_no = registration_no
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_string);

        let row = IdentityRow::new(
            identity.as_str(),
            full_name,
            registration_no,
            OffsetDateTime::now_utc(),
        );
        let created = bounded(
            self.limit(),
            "upsert identity",
            self.metadata.upsert_identity(&row),
        )
        .await?;

        tracing::info!(created, "identity registered");
        Ok(RegisteredIdentity {
            identity_key: identity.to_string(),
            created,
        })
    }

    /// Record an original that already sits in the pending area.
    ///
    /// `pending_path` is relative to the pending directory. Only jpg, jpeg,
    /// png and gif files are accepted; size and content type come from the file.
    #[instrument(skip(self))]
    pub async fn register_resource(
        &self,
        resource_key: &str,
        pending_path: &str,
    ) -> AssignResult<RegisteredResource> {
        let resource = ResourceKey::parse(resource_key)?;
        let pending_path = pending_path.trim();
        let extension = extension_of(pending_path).ok_or_else(|| {
            AssignError::InvalidInput(format!("file has no extension: {pending_path}"))
        })?;
        let content_type = content_type_for(&extension)?;
        let storage_path = join_storage_path(&self.config.storage.pending_dir, pending_path);

        let meta = match within(
            self.limit(),
            "inspect original",
            self.storage.inspect(&storage_path),
        )
        .await?
        {
            Ok(meta) => meta,
            Err(StorageError::NotFound(_)) => {
                return Err(AssignError::InvalidInput(format!(
                    "pending file not found: {storage_path}"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let file_size = i64::try_from(meta.size)
            .map_err(|_| AssignError::InvalidInput(format!("file too large: {storage_path}")))?;

        let row = ResourceRow::new(
            resource.as_str(),
            storage_path.as_str(),
            file_size,
            content_type,
            OffsetDateTime::now_utc(),
        );
        bounded(
            self.limit(),
            "create resource",
            self.metadata.create_resource(&row),
        )
        .await?;

        tracing::info!(storage_path = %storage_path, size = meta.size, "resource registered");
        Ok(RegisteredResource {
            resource_key: resource.to_string(),
            path: storage_path,
            file_size: meta.size,
            content_type: content_type.to_string(),
        })
    }

    /// Delete an unclaimed resource and its original.
    #[instrument(skip(self))]
    pub async fn delete_resource(&self, resource_key: &str) -> AssignResult<()> {
        let resource = ResourceKey::parse(resource_key)?;
        let limit = self.limit();

        let row = match within(
            limit,
            "delete resource",
            self.metadata.delete_unclaimed_resource(resource.as_str()),
        )
        .await?
        {
            Ok(row) => row,
            Err(MetadataError::NotFound(_)) => {
                return Err(AssignError::ResourceNotFound(resource.to_string()));
            }
            Err(MetadataError::Conflict(_)) => {
                return Err(AssignError::ResourceClaimed(resource.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        // The record is gone; a leftover original is unreferenced and only logged.
        match within(
            limit,
            "remove original",
            self.storage.remove_pending(&row.file_path),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(StorageError::NotFound(_))) => {
                tracing::warn!(storage_path = %row.file_path, "original already missing");
            }
            Ok(Err(e)) => {
                tracing::error!(
                    storage_path = %row.file_path,
                    error = %e,
                    "failed to remove original"
                );
            }
            Err(e) => {
                tracing::error!(
                    storage_path = %row.file_path,
                    error = %e,
                    "failed to remove original"
                );
            }
        }

        tracing::info!("resource deleted");
        Ok(())
    }
}
