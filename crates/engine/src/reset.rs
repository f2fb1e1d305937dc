//! Inverse operations: undo an assignment, delete an identity.
//!
//! Both run as one unit of work. The assigned copy is moved aside before the
//! commit and only deleted once the commit succeeded; a failed commit moves
//! it back.

use crate::engine::Engine;
use crate::error::{AssignError, AssignResult};
use crate::metrics;
use crate::timeout::{bounded, within};
use portrait_core::IdentityKey;
use portrait_metadata::models::IdentityRow;
use portrait_metadata::repos::AssignmentTx;
use portrait_storage::{StagedRemoval, StorageError};
use tracing::instrument;

impl Engine {
    /// Undo the assignment of an identity.
    ///
    /// Clears the link, releases the resource and removes the copy, returning
    /// both rows to their pre-assignment values.
    #[instrument(skip(self))]
    pub async fn reset_assignment(&self, identity_key: &str) -> AssignResult<()> {
        let identity = IdentityKey::parse(identity_key)?;
        let mut tx = bounded(self.limit(), "begin", self.metadata.begin_assignment()).await?;

        let staged = match self.unwind_locked(&mut *tx, &identity, true).await {
            Ok(staged) => staged,
            Err(e) => {
                self.discard(tx).await;
                return Err(e);
            }
        };

        self.settle(tx, staged.flatten()).await?;
        metrics::RESETS.inc();
        tracing::info!("assignment reset");
        Ok(())
    }

    /// Delete an identity, unwinding its assignment first if it has one.
    #[instrument(skip(self))]
    pub async fn delete_identity(&self, identity_key: &str) -> AssignResult<()> {
        let identity = IdentityKey::parse(identity_key)?;
        let mut tx = bounded(self.limit(), "begin", self.metadata.begin_assignment()).await?;

        let staged = match self.unwind_locked(&mut *tx, &identity, false).await {
            Ok(staged) => staged,
            Err(e) => {
                self.discard(tx).await;
                return Err(e);
            }
        };
        let was_assigned = staged.is_some();

        if let Err(e) = bounded(
            self.limit(),
            "delete identity",
            tx.delete_identity(identity.as_str()),
        )
        .await
        {
            self.discard(tx).await;
            return Err(e);
        }

        self.settle(tx, staged.flatten()).await?;
        if was_assigned {
            metrics::RESETS.inc();
        }
        tracing::info!(was_assigned, "identity deleted");
        Ok(())
    }

    /// Read the identity inside `tx` and undo its assignment.
    ///
    /// Returns `None` when the identity has no assignment (an error if
    /// `require_assignment`), otherwise the staged removal of its copy, which
    /// is itself `None` if the copy was already gone.
    async fn unwind_locked(
        &self,
        tx: &mut dyn AssignmentTx,
        identity: &IdentityKey,
        require_assignment: bool,
    ) -> AssignResult<Option<Option<StagedRemoval>>> {
        let limit = self.limit();
        let row: IdentityRow = bounded(
            limit,
            "identity lookup",
            tx.find_identity(identity.as_str()),
        )
        .await?
        .ok_or_else(|| AssignError::IdentityNotFound(identity.to_string()))?;

        let (Some(resource_key), Some(photo_path)) = (row.assigned_resource_key, row.photo_path)
        else {
            if require_assignment {
                return Err(AssignError::NothingAssigned(identity.to_string()));
            }
            return Ok(None);
        };

        bounded(limit, "unlink", tx.unlink_resource(identity.as_str())).await?;
        bounded(limit, "release", tx.release_resource(&resource_key)).await?;

        let staged = match within(limit, "stage removal", self.storage.stage_removal(&photo_path))
            .await?
        {
            Ok(staged) => Some(staged),
            Err(StorageError::NotFound(_)) => {
                tracing::warn!(storage_path = %photo_path, "assigned copy already missing");
                None
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            resource_key = %resource_key,
            storage_path = %photo_path,
            "assignment unwound"
        );
        Ok(Some(staged))
    }

    /// Commit, then delete the staged copy; restore it if the commit failed.
    async fn settle(
        &self,
        tx: Box<dyn AssignmentTx>,
        staged: Option<StagedRemoval>,
    ) -> AssignResult<()> {
        if let Err(e) = tx.commit().await {
            if let Some(staged) = staged {
                let key = staged.key().to_string();
                if let Err(restore) = staged.restore().await {
                    metrics::COMPENSATION_FAILURES.inc();
                    tracing::error!(
                        storage_path = %key,
                        error = %restore,
                        "failed to restore copy"
                    );
                }
            }
            return Err(e.into());
        }

        if let Some(staged) = staged {
            let key = staged.key().to_string();
            if let Err(e) = staged.finish().await {
                metrics::COMPENSATION_FAILURES.inc();
                tracing::error!(storage_path = %key, error = %e, "failed to delete staged copy");
            }
        }
        Ok(())
    }

    async fn discard(&self, tx: Box<dyn AssignmentTx>) {
        if let Err(e) = bounded(self.limit(), "rollback", tx.rollback()).await {
            tracing::warn!(error = %e, "rollback failed");
        }
    }
}
