//! Metadata and storage wrappers that inject failures and delays.

use async_trait::async_trait;
use portrait_metadata::models::{IdentityRow, ResourceRow};
use portrait_metadata::repos::{AssignmentRepo, AssignmentTx, IdentityRepo, ResourceRepo};
use portrait_metadata::{MetadataError, MetadataResult, MetadataStore};
use portrait_storage::{
    MaterializedFile, Materializer, ObjectMeta, StagedRemoval, StorageResult,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;

/// Which faults to inject. Flags can be flipped while the engine runs.
#[derive(Debug, Default)]
pub struct FaultPlan {
    /// Roll back instead of committing and report a failure.
    pub fail_commit: AtomicBool,
    /// Report the identity as linked by someone else.
    pub link_conflict: AtomicBool,
    /// Sleep after a successful copy, holding the destination.
    pub materialize_delay_ms: AtomicU64,
    /// Number of copies made, kept or not.
    pub materialized: AtomicU64,
    /// Report claimed resources as gone when read back in the transaction.
    pub hide_claimed: AtomicBool,
    /// Report claimed resources with this original path instead.
    pub claimed_path: Mutex<Option<String>>,
}

impl FaultPlan {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_commit(self: &Arc<Self>) -> Arc<Self> {
        self.fail_commit.store(true, Ordering::SeqCst);
        self.clone()
    }

    pub fn link_conflict(self: &Arc<Self>) -> Arc<Self> {
        self.link_conflict.store(true, Ordering::SeqCst);
        self.clone()
    }

    pub fn slow_materialize(self: &Arc<Self>, ms: u64) -> Arc<Self> {
        self.materialize_delay_ms.store(ms, Ordering::SeqCst);
        self.clone()
    }

    pub fn hide_claimed(self: &Arc<Self>) -> Arc<Self> {
        self.hide_claimed.store(true, Ordering::SeqCst);
        self.clone()
    }

    pub fn claimed_path(self: &Arc<Self>, path: &str) -> Arc<Self> {
        *self.claimed_path.lock().unwrap() = Some(path.to_string());
        self.clone()
    }
}

pub struct FaultyStore {
    inner: Arc<dyn MetadataStore>,
    plan: Arc<FaultPlan>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn MetadataStore>, plan: Arc<FaultPlan>) -> Self {
        Self { inner, plan }
    }
}

#[async_trait]
impl IdentityRepo for FaultyStore {
    async fn create_identity(&self, identity: &IdentityRow) -> MetadataResult<()> {
        self.inner.create_identity(identity).await
    }

    async fn upsert_identity(&self, identity: &IdentityRow) -> MetadataResult<bool> {
        self.inner.upsert_identity(identity).await
    }

    async fn get_identity(&self, identity_key: &str) -> MetadataResult<Option<IdentityRow>> {
        self.inner.get_identity(identity_key).await
    }

    async fn count_identities(&self) -> MetadataResult<u64> {
        self.inner.count_identities().await
    }

    async fn count_assigned_identities(&self) -> MetadataResult<u64> {
        self.inner.count_assigned_identities().await
    }
}

#[async_trait]
impl ResourceRepo for FaultyStore {
    async fn create_resource(&self, resource: &ResourceRow) -> MetadataResult<()> {
        self.inner.create_resource(resource).await
    }

    async fn get_resource(&self, resource_key: &str) -> MetadataResult<Option<ResourceRow>> {
        self.inner.get_resource(resource_key).await
    }

    async fn find_unclaimed(&self, resource_key: &str) -> MetadataResult<Option<ResourceRow>> {
        self.inner.find_unclaimed(resource_key).await
    }

    async fn list_unclaimed(&self, offset: u64, limit: u64) -> MetadataResult<Vec<ResourceRow>> {
        self.inner.list_unclaimed(offset, limit).await
    }

    async fn count_unclaimed(&self) -> MetadataResult<u64> {
        self.inner.count_unclaimed().await
    }

    async fn count_resources(&self) -> MetadataResult<u64> {
        self.inner.count_resources().await
    }

    async fn delete_unclaimed_resource(&self, resource_key: &str) -> MetadataResult<ResourceRow> {
        self.inner.delete_unclaimed_resource(resource_key).await
    }
}

#[async_trait]
impl AssignmentRepo for FaultyStore {
    async fn begin_assignment(&self) -> MetadataResult<Box<dyn AssignmentTx>> {
        let inner = self.inner.begin_assignment().await?;
        Ok(Box::new(FaultyTx {
            inner,
            plan: self.plan.clone(),
        }))
    }
}

#[async_trait]
impl MetadataStore for FaultyStore {
    async fn migrate(&self) -> MetadataResult<()> {
        self.inner.migrate().await
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.inner.health_check().await
    }
}

pub struct FaultyTx {
    inner: Box<dyn AssignmentTx>,
    plan: Arc<FaultPlan>,
}

#[async_trait]
impl AssignmentTx for FaultyTx {
    async fn find_identity(&mut self, identity_key: &str) -> MetadataResult<Option<IdentityRow>> {
        self.inner.find_identity(identity_key).await
    }

    async fn find_resource(&mut self, resource_key: &str) -> MetadataResult<Option<ResourceRow>> {
        if self.plan.hide_claimed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut row = self.inner.find_resource(resource_key).await?;
        let path = self.plan.claimed_path.lock().unwrap().clone();
        if let (Some(row), Some(path)) = (row.as_mut(), path) {
            row.file_path = path;
        }
        Ok(row)
    }

    async fn claim_resource(
        &mut self,
        resource_key: &str,
        claimed_at: OffsetDateTime,
    ) -> MetadataResult<()> {
        self.inner.claim_resource(resource_key, claimed_at).await
    }

    async fn release_resource(&mut self, resource_key: &str) -> MetadataResult<()> {
        self.inner.release_resource(resource_key).await
    }

    async fn photo_path_in_use(&mut self, photo_path: &str) -> MetadataResult<bool> {
        self.inner.photo_path_in_use(photo_path).await
    }

    async fn link_resource(
        &mut self,
        identity_key: &str,
        resource_key: &str,
        photo_path: &str,
        assigned_at: OffsetDateTime,
    ) -> MetadataResult<()> {
        if self.plan.link_conflict.load(Ordering::SeqCst) {
            return Err(MetadataError::Conflict(format!(
                "identity {identity_key} already linked"
            )));
        }
        self.inner
            .link_resource(identity_key, resource_key, photo_path, assigned_at)
            .await
    }

    async fn unlink_resource(&mut self, identity_key: &str) -> MetadataResult<()> {
        self.inner.unlink_resource(identity_key).await
    }

    async fn delete_identity(&mut self, identity_key: &str) -> MetadataResult<()> {
        self.inner.delete_identity(identity_key).await
    }

    async fn commit(self: Box<Self>) -> MetadataResult<()> {
        let this = *self;
        if this.plan.fail_commit.load(Ordering::SeqCst) {
            this.inner.rollback().await?;
            return Err(MetadataError::Internal("injected commit failure".to_string()));
        }
        this.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> MetadataResult<()> {
        self.inner.rollback().await
    }
}

pub struct FaultyMaterializer {
    inner: Arc<dyn Materializer>,
    plan: Arc<FaultPlan>,
}

impl FaultyMaterializer {
    pub fn new(inner: Arc<dyn Materializer>, plan: Arc<FaultPlan>) -> Self {
        Self { inner, plan }
    }
}

#[async_trait]
impl Materializer for FaultyMaterializer {
    async fn materialize(
        &self,
        source: &str,
        dest_dir: &str,
        filename: &str,
    ) -> StorageResult<MaterializedFile> {
        let copy = self.inner.materialize(source, dest_dir, filename).await?;
        self.plan.materialized.fetch_add(1, Ordering::SeqCst);
        let delay = self.plan.materialize_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(copy)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn inspect(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.inspect(key).await
    }

    async fn stage_removal(&self, key: &str) -> StorageResult<StagedRemoval> {
        self.inner.stage_removal(key).await
    }

    async fn remove_pending(&self, key: &str) -> StorageResult<()> {
        self.inner.remove_pending(key).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}
