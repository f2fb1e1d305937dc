//! Storage trait definitions.

use crate::error::StorageResult;
use crate::guard::{MaterializedFile, StagedRemoval};
use async_trait::async_trait;

/// File metadata reported by [`Materializer::inspect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// File size in bytes.
    pub size: u64,
    /// Image content type derived from the extension, if it is an accepted one.
    pub content_type: Option<String>,
}

/// Photo file operations used by the assignment engine.
///
/// Keys are storage-root-relative paths with `/` separators, exactly as they
/// are recorded in the metadata store.
#[async_trait]
pub trait Materializer: Send + Sync {
    /// Copy `source` to `dest_dir/filename` without ever overwriting.
    ///
    /// The copy is byte-for-byte and flushed to disk before returning; the
    /// source is left untouched. The returned guard deletes the copy when
    /// dropped unless [`MaterializedFile::keep`] is called.
    async fn materialize(
        &self,
        source: &str,
        dest_dir: &str,
        filename: &str,
    ) -> StorageResult<MaterializedFile>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Report size and content type of a regular file.
    async fn inspect(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Move a file aside so its removal can be settled later.
    ///
    /// The returned guard either deletes the file for good or puts it back.
    async fn stage_removal(&self, key: &str) -> StorageResult<StagedRemoval>;

    /// Delete an original from the pending area.
    async fn remove_pending(&self, key: &str) -> StorageResult<()>;

    /// Check storage health.
    async fn health_check(&self) -> StorageResult<()>;

    /// Get the backend name.
    fn backend_name(&self) -> &'static str;
}
