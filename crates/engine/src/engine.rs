//! Engine context shared by every operation.

use crate::error::{AssignError, AssignResult};
use crate::timeout::bounded;
use portrait_core::config::AppConfig;
use portrait_metadata::MetadataStore;
use portrait_storage::Materializer;
use std::sync::Arc;
use std::time::Duration;

/// Assignment engine over injected metadata and file stores.
///
/// Cheap to clone; clones share the same stores and configuration.
#[derive(Clone)]
pub struct Engine {
    /// Application configuration.
    pub(crate) config: Arc<AppConfig>,
    /// Metadata store.
    pub(crate) metadata: Arc<dyn MetadataStore>,
    /// Photo file store.
    pub(crate) storage: Arc<dyn Materializer>,
}

impl Engine {
    /// Create an engine from already-built stores.
    ///
    /// Fails with `InvalidInput` if the configuration does not validate.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn Materializer>,
    ) -> AssignResult<Self> {
        config.validate().map_err(AssignError::InvalidInput)?;
        crate::metrics::register_metrics();

        tracing::debug!(
            storage_backend = storage.backend_name(),
            operation_timeout_ms = config.assignment.operation_timeout_ms,
            "assignment engine ready"
        );

        Ok(Self {
            config: Arc::new(config),
            metadata,
            storage,
        })
    }

    /// Build both stores from configuration and wrap them in an engine.
    pub async fn from_config(config: AppConfig) -> AssignResult<Self> {
        config.validate().map_err(AssignError::InvalidInput)?;
        let metadata = portrait_metadata::from_config(&config.metadata).await?;
        let storage = portrait_storage::from_config(&config.storage).await?;
        Self::new(config, metadata, storage)
    }

    /// Application configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check that both stores are reachable.
    pub async fn health_check(&self) -> AssignResult<()> {
        let limit = self.limit();
        bounded(limit, "metadata health check", self.metadata.health_check()).await?;
        bounded(limit, "storage health check", self.storage.health_check()).await?;
        Ok(())
    }

    /// Upper bound for a single store or filesystem call.
    pub(crate) fn limit(&self) -> Duration {
        self.config.assignment.operation_timeout()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("storage_backend", &self.storage.backend_name())
            .field("assignment", &self.config.assignment)
            .finish_non_exhaustive()
    }
}
