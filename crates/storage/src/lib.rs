//! Photo file storage for Portrait.
//!
//! This crate provides:
//! - Exclusive, durable copies from the pending area to the assigned area
//! - Guards that undo a copy or a removal unless the caller settles them
//! - Traversal and symlink protection relative to the storage root

pub mod backends;
pub mod error;
pub mod guard;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use guard::{MaterializedFile, StagedRemoval};
pub use traits::{Materializer, ObjectMeta};

use portrait_core::config::StorageConfig;
use std::sync::Arc;

/// Create a materializer from configuration.
///
/// Creates the storage root and both areas if they are missing.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn Materializer>> {
    config.validate().map_err(StorageError::Config)?;

    let backend =
        FilesystemBackend::new(&config.root).await?.with_pending_dir(config.pending_dir.clone());
    for dir in [&config.pending_dir, &config.assigned_dir] {
        tokio::fs::create_dir_all(backend.root().join(dir)).await?;
    }
    Ok(Arc::new(backend))
}
