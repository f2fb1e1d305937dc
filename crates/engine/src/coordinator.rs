//! Assignment coordinator.
//!
//! An assignment moves through
//! `Start -> Validated -> ResourceClaimed -> FileMaterialized -> Linked -> Committed`.
//! Every state before `Committed` can fall back to `RolledBack`, which undoes the
//! claim and the link with the transaction and deletes any materialized copy.

use crate::engine::Engine;
use crate::error::{AssignError, AssignResult};
use crate::metrics;
use crate::timeout::within;
use portrait_core::filename::{
    destination_filename, extension_of, join_storage_path, keyed_fragment, sanitize_fragment,
};
use portrait_core::{IdentityKey, ResourceKey};
use portrait_metadata::MetadataError;
use portrait_metadata::models::ResourceRow;
use portrait_metadata::repos::AssignmentTx;
use portrait_storage::MaterializedFile;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// A committed pairing, exactly as recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub resource_key: String,
    /// Storage path of the materialized copy, relative to the storage root.
    pub storage_path: String,
    pub identity_key: String,
}

/// States of a single assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignState {
    Start,
    Validated,
    ResourceClaimed,
    FileMaterialized,
    Linked,
    Committed,
    RolledBack,
}

impl AssignState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Validated => "validated",
            Self::ResourceClaimed => "resource_claimed",
            Self::FileMaterialized => "file_materialized",
            Self::Linked => "linked",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for AssignState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Engine {
    /// Pair `identity_key` with `resource_key`.
    ///
    /// Either both records and the copy under the assigned area exist
    /// afterwards, or none of them changed.
    pub async fn assign_resource(
        &self,
        identity_key: &str,
        resource_key: &str,
    ) -> AssignResult<Assignment> {
        self.assign_resource_with_cancel(identity_key, resource_key, CancellationToken::new())
            .await
    }

    /// Like [`assign_resource`](Self::assign_resource), abandoning the attempt
    /// when `cancel` fires before the commit.
    ///
    /// The work runs on its own task. Dropping the returned future cancels it
    /// the same way, and the task still rolls back before it exits.
    pub async fn assign_resource_with_cancel(
        &self,
        identity_key: &str,
        resource_key: &str,
        cancel: CancellationToken,
    ) -> AssignResult<Assignment> {
        let identity = IdentityKey::parse(identity_key)?;
        let resource = ResourceKey::parse(resource_key)?;

        let token = cancel.child_token();
        let guard = token.clone().drop_guard();
        let span = tracing::info_span!(
            "assign",
            identity_key = %identity,
            resource_key = %resource
        );
        let engine = self.clone();
        let handle = tokio::spawn(
            async move { engine.run_assignment(identity, resource, token).await }.instrument(span),
        );

        let joined = handle.await;
        guard.disarm();
        joined.map_err(|e| AssignError::Internal(format!("assignment task failed: {e}")))?
    }

    async fn run_assignment(
        self,
        identity: IdentityKey,
        resource: ResourceKey,
        cancel: CancellationToken,
    ) -> AssignResult<Assignment> {
        let timer = metrics::ASSIGNMENT_DURATION.start_timer();
        let result = self.drive(&identity, &resource, &cancel).await;
        timer.observe_duration();

        match &result {
            Ok(assignment) => {
                metrics::ASSIGNMENTS_COMMITTED.inc();
                tracing::info!(
                    storage_path = %assignment.storage_path,
                    state = %AssignState::Committed,
                    "assignment committed"
                );
            }
            Err(e) => {
                metrics::ASSIGNMENTS_FAILED
                    .with_label_values(&[e.code()])
                    .inc();
                tracing::info!(error = %e, code = e.code(), "assignment not committed");
            }
        }
        result
    }

    async fn drive(
        &self,
        identity: &IdentityKey,
        resource: &ResourceKey,
        cancel: &CancellationToken,
    ) -> AssignResult<Assignment> {
        self.enter(cancel, AssignState::Start)?;

        let row = self
            .step(cancel, "identity lookup", self.metadata.get_identity(identity.as_str()))
            .await??
            .ok_or_else(|| AssignError::IdentityNotFound(identity.to_string()))?;
        if row.is_assigned() {
            return Err(AssignError::AlreadyAssigned(identity.to_string()));
        }
        self.step(cancel, "resource lookup", self.metadata.find_unclaimed(resource.as_str()))
            .await??
            .ok_or_else(|| AssignError::ResourceUnavailable(resource.to_string()))?;

        self.enter(cancel, AssignState::Validated)?;
        let mut tx = self
            .step(cancel, "begin", self.metadata.begin_assignment())
            .await??;

        let claimed = match self.claim(&mut *tx, identity, resource, cancel).await {
            Ok(claimed) => claimed,
            Err(e) => return Err(self.abort(tx, None, AssignState::Validated, e).await),
        };

        if let Err(e) = self.enter(cancel, AssignState::ResourceClaimed) {
            return Err(self.abort(tx, None, AssignState::ResourceClaimed, e).await);
        }
        let copy = match self
            .materialize(&mut *tx, identity, &claimed.file_path, cancel)
            .await
        {
            Ok(copy) => copy,
            Err(e) => return Err(self.abort(tx, None, AssignState::ResourceClaimed, e).await),
        };

        if let Err(e) = self.enter(cancel, AssignState::FileMaterialized) {
            return Err(self
                .abort(tx, Some(copy), AssignState::FileMaterialized, e)
                .await);
        }
        let linked = self
            .step(
                cancel,
                "link",
                tx.link_resource(
                    identity.as_str(),
                    resource.as_str(),
                    copy.key(),
                    OffsetDateTime::now_utc(),
                ),
            )
            .await
            .and_then(|linked| match linked {
                Ok(()) => Ok(()),
                Err(MetadataError::Conflict(_)) => {
                    Err(AssignError::AlreadyAssigned(identity.to_string()))
                }
                Err(e) => Err(e.into()),
            });
        if let Err(e) = linked {
            return Err(self
                .abort(tx, Some(copy), AssignState::FileMaterialized, e)
                .await);
        }

        if let Err(e) = self.enter(cancel, AssignState::Linked) {
            return Err(self.abort(tx, Some(copy), AssignState::Linked, e).await);
        }
        // The commit is not raced against the deadline or the token: an
        // abandoned commit has an unknown outcome. Database-side timeouts bound it.
        if let Err(e) = tx.commit().await {
            let e = AssignError::from(e);
            tracing::warn!(state = %AssignState::RolledBack, error = %e, "commit failed");
            self.compensate(copy).await;
            return Err(e);
        }

        Ok(Assignment {
            resource_key: resource.to_string(),
            storage_path: copy.keep(),
            identity_key: identity.to_string(),
        })
    }

    /// Re-check the identity inside the transaction, then claim the resource
    /// and return the claimed row as the transaction sees it.
    async fn claim(
        &self,
        tx: &mut dyn AssignmentTx,
        identity: &IdentityKey,
        resource: &ResourceKey,
        cancel: &CancellationToken,
    ) -> AssignResult<ResourceRow> {
        let current = self
            .step(cancel, "identity recheck", tx.find_identity(identity.as_str()))
            .await??;
        match current {
            None => return Err(AssignError::IdentityNotFound(identity.to_string())),
            Some(row) if row.is_assigned() => {
                return Err(AssignError::AlreadyAssigned(identity.to_string()));
            }
            Some(_) => {}
        }

        let claimed = self
            .step(
                cancel,
                "claim",
                tx.claim_resource(resource.as_str(), OffsetDateTime::now_utc()),
            )
            .await?;
        match claimed {
            Ok(()) => {}
            Err(MetadataError::Conflict(_)) => {
                return Err(AssignError::ResourceUnavailable(resource.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        self.step(cancel, "claimed lookup", tx.find_resource(resource.as_str()))
            .await??
            .ok_or_else(|| AssignError::ResourceUnavailable(resource.to_string()))
    }

    /// Copy the original into the assigned area under a name no one else uses.
    async fn materialize(
        &self,
        tx: &mut dyn AssignmentTx,
        identity: &IdentityKey,
        source: &str,
        cancel: &CancellationToken,
    ) -> AssignResult<MaterializedFile> {
        let assigned_dir = self.config.storage.assigned_dir.as_str();
        let extension = extension_of(source)
            .unwrap_or_else(|| self.config.assignment.fallback_extension.clone());

        let mut filename =
            destination_filename(&sanitize_fragment(identity.as_str()), &extension);
        let plain_path = join_storage_path(assigned_dir, &filename);
        if self.path_taken(tx, &plain_path, cancel).await? {
            filename = destination_filename(&keyed_fragment(identity.as_str()), &extension);
            tracing::debug!(taken = %plain_path, filename = %filename, "using keyed filename");
        }

        let copy = self
            .step(
                cancel,
                "materialize",
                self.storage.materialize(source, assigned_dir, &filename),
            )
            .await??;
        Ok(copy)
    }

    async fn path_taken(
        &self,
        tx: &mut dyn AssignmentTx,
        path: &str,
        cancel: &CancellationToken,
    ) -> AssignResult<bool> {
        if self
            .step(cancel, "photo path lookup", tx.photo_path_in_use(path))
            .await??
        {
            return Ok(true);
        }
        Ok(self
            .step(cancel, "destination check", self.storage.exists(path))
            .await??)
    }

    /// Run one store or filesystem call under the deadline and the token.
    async fn step<F: Future>(
        &self,
        cancel: &CancellationToken,
        what: &'static str,
        fut: F,
    ) -> AssignResult<F::Output> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(AssignError::Cancelled(format!("cancelled during {what}")))
            }
            out = within(self.limit(), what, fut) => out,
        }
    }

    /// Record a state boundary, failing if cancellation was requested.
    fn enter(&self, cancel: &CancellationToken, state: AssignState) -> AssignResult<()> {
        if cancel.is_cancelled() {
            return Err(AssignError::Cancelled(format!("cancelled at {state}")));
        }
        tracing::debug!(state = %state, "assignment state");
        Ok(())
    }

    /// Roll back the unit of work and delete the copy, returning `err`.
    async fn abort(
        &self,
        tx: Box<dyn AssignmentTx>,
        copy: Option<MaterializedFile>,
        from: AssignState,
        err: AssignError,
    ) -> AssignError {
        match within(self.limit(), "rollback", tx.rollback()).await {
            Ok(Ok(())) => {}
            // The dropped transaction still rolls back on its connection.
            Ok(Err(e)) => tracing::warn!(error = %e, "rollback failed"),
            Err(e) => tracing::warn!(error = %e, "rollback timed out"),
        }
        if let Some(copy) = copy {
            self.compensate(copy).await;
        }
        tracing::debug!(
            from = %from,
            state = %AssignState::RolledBack,
            error = %err,
            "assignment rolled back"
        );
        err
    }

    /// Delete a copy whose database half did not commit.
    async fn compensate(&self, copy: MaterializedFile) {
        let storage_path = copy.key().to_string();
        match copy.discard().await {
            Ok(()) => {
                metrics::COMPENSATING_DELETES.inc();
                tracing::info!(storage_path = %storage_path, "removed materialized copy");
            }
            Err(e) => {
                metrics::COMPENSATION_FAILURES.inc();
                tracing::error!(
                    storage_path = %storage_path,
                    error = %e,
                    "failed to remove materialized copy"
                );
            }
        }
    }
}
