//! Engine fixture over a temporary storage root and SQLite database.

use super::faults::{FaultPlan, FaultyMaterializer, FaultyStore};
use portrait_core::config::AppConfig;
use portrait_engine::Engine;
use portrait_metadata::MetadataStore;
use portrait_metadata::models::{IdentityRow, ResourceRow};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Deterministic image-ish bytes for an original.
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    let mut state = seed;
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    data
}

/// An engine plus direct access to its stores for assertions.
#[allow(dead_code)]
pub struct TestEngine {
    pub engine: Engine,
    pub metadata: Arc<dyn MetadataStore>,
    pub config: AppConfig,
    dir: TempDir,
}

#[allow(dead_code)]
impl TestEngine {
    /// Engine with the default test configuration.
    pub async fn new() -> Self {
        Self::build(|_| {}, None).await
    }

    /// Engine whose configuration is adjusted by `tweak` first.
    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(tweak, None).await
    }

    /// Engine whose stores inject the faults described by `plan`.
    pub async fn with_faults(plan: Arc<FaultPlan>) -> Self {
        Self::build(|_| {}, Some(plan)).await
    }

    /// Like [`with_faults`](Self::with_faults) with a custom operation timeout.
    pub async fn with_faults_and_timeout(plan: Arc<FaultPlan>, timeout_ms: u64) -> Self {
        Self::build(
            |config| config.assignment.operation_timeout_ms = timeout_ms,
            Some(plan),
        )
        .await
    }

    async fn build(tweak: impl FnOnce(&mut AppConfig), faults: Option<Arc<FaultPlan>>) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(dir.path());
        tweak(&mut config);

        let metadata = portrait_metadata::from_config(&config.metadata)
            .await
            .expect("Failed to open metadata store");
        let storage = portrait_storage::from_config(&config.storage)
            .await
            .expect("Failed to open storage");

        let (engine_metadata, engine_storage): (Arc<dyn MetadataStore>, _) = match faults {
            Some(plan) => (
                Arc::new(FaultyStore::new(metadata.clone(), plan.clone())),
                Arc::new(FaultyMaterializer::new(storage, plan))
                    as Arc<dyn portrait_storage::Materializer>,
            ),
            None => (metadata.clone(), storage),
        };

        let engine = Engine::new(config.clone(), engine_metadata, engine_storage)
            .expect("Failed to build engine");
        Self {
            engine,
            metadata,
            config,
            dir,
        }
    }

    /// Absolute storage root.
    pub fn root(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    /// Absolute path of a storage key.
    pub fn path_of(&self, storage_path: &str) -> PathBuf {
        self.root().join(storage_path)
    }

    /// Write an original into the pending area.
    pub fn write_pending(&self, name: &str, bytes: &[u8]) {
        let path = self.root().join("pending").join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, bytes).unwrap();
    }

    /// Register an identity with a generated name.
    pub async fn add_identity(&self, key: &str) {
        self.engine
            .register_identity(key, &format!("Student {key}"), Some("REG-1"))
            .await
            .unwrap();
    }

    /// Write `pending/{key}.jpg` and register it as a resource.
    pub async fn add_resource(&self, key: &str) -> Vec<u8> {
        let bytes = seeded_bytes(key.len() as u64 * 31 + 7, 4096);
        let name = format!("{key}.jpg");
        self.write_pending(&name, &bytes);
        self.engine.register_resource(key, &name).await.unwrap();
        bytes
    }

    pub async fn identity_row(&self, key: &str) -> Option<IdentityRow> {
        self.metadata.get_identity(key).await.unwrap()
    }

    pub async fn resource_row(&self, key: &str) -> Option<ResourceRow> {
        self.metadata.get_resource(key).await.unwrap()
    }

    /// Every entry in the assigned area, staged leftovers included.
    pub fn assigned_files(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.root().join("assigned")) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Poll until `key` is unclaimed, for work that settles on a background task.
    pub async fn wait_unclaimed(&self, key: &str) -> bool {
        for _ in 0..100 {
            if let Some(row) = self.resource_row(key).await {
                if !row.claimed && self.assigned_files().is_empty() {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }
}
