//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::guard::{MaterializedFile, StagedRemoval};
use crate::traits::{Materializer, ObjectMeta};
use async_trait::async_trait;
use portrait_core::filename::{content_type_for, extension_of, join_storage_path};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::oneshot;
use tracing::{Instrument, instrument};
use uuid::Uuid;

/// Local filesystem photo store.
pub struct FilesystemBackend {
    root: PathBuf,
    pending_dir: String,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            pending_dir: "pending".to_string(),
        })
    }

    /// Set the directory (relative to the root) that holds originals.
    pub fn with_pending_dir(mut self, pending_dir: impl Into<String>) -> Self {
        self.pending_dir = pending_dir.into();
        self
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the full path for a key, with path traversal protection.
    ///
    /// Runs `key_path_sync` on the blocking pool since it canonicalizes paths.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Resolve a key under `root`, rejecting anything that escapes it.
    ///
    /// Symlinks are followed: an existing path, or the nearest existing
    /// ancestor of a new one, must canonicalize to a location inside the root.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "key must be a relative path: {key}"
            )));
        }
        for component in Path::new(key).components() {
            if !matches!(component, std::path::Component::Normal(_)) {
                return Err(StorageError::InvalidKey(format!(
                    "contains unsafe path component: {key}"
                )));
            }
        }

        let path = root.join(key);
        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        // Check the path itself if it exists, otherwise its nearest existing ancestor.
        let mut candidate = Some(path.as_path());
        while let Some(current) = candidate {
            match std::fs::symlink_metadata(current) {
                Ok(meta) => {
                    let canonical = current.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!("dangling symlink in key: {key}"))
                        } else {
                            StorageError::Io(e)
                        }
                    })?;
                    if !canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "resolved path escapes storage root: {key}"
                        )));
                    }
                    return Ok(path);
                }
                // A file standing where a directory should be is treated like a
                // missing directory; its own ancestor is checked next.
                Err(err)
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
                    ) =>
                {
                    candidate = current.parent();
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(path)
    }

    /// Create `dest_path` exclusively and copy `src` into it, flushed to disk.
    async fn write_copy(
        mut src: fs::File,
        dest_key: String,
        dest_path: PathBuf,
    ) -> StorageResult<MaterializedFile> {
        let write_failed = |source: std::io::Error| StorageError::DestinationWriteFailed {
            path: dest_key.clone(),
            source,
        };

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).await.map_err(write_failed)?;
        }

        let mut dst = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&dest_path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    StorageError::DestinationExists(dest_key.clone())
                } else {
                    write_failed(e)
                }
            })?;

        // From here on the guard owns the destination.
        let guard = MaterializedFile::new(dest_key.clone(), dest_path);

        let copied = async {
            let bytes = tokio::io::copy(&mut src, &mut dst).await?;
            dst.sync_all().await?;
            Ok::<u64, std::io::Error>(bytes)
        }
        .await;
        drop(dst);

        match copied {
            Ok(bytes) => {
                tracing::trace!(dest = %dest_key, bytes, "copy flushed");
                Ok(guard)
            }
            Err(e) => {
                if let Err(cleanup) = guard.discard().await {
                    tracing::error!(
                        dest = %dest_key,
                        error = %cleanup,
                        "failed to remove partial copy"
                    );
                }
                Err(write_failed(e))
            }
        }
    }

    fn not_found(key: &str, e: std::io::Error) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

#[async_trait]
impl Materializer for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn materialize(
        &self,
        source: &str,
        dest_dir: &str,
        filename: &str,
    ) -> StorageResult<MaterializedFile> {
        if filename.is_empty() || filename.contains('/') || filename.starts_with('.') {
            return Err(StorageError::InvalidKey(format!(
                "invalid destination filename: {filename}"
            )));
        }
        let dest_key = join_storage_path(dest_dir, filename);

        let source_path = self.key_path(source).await.map_err(|e| match e {
            StorageError::InvalidKey(_) => e,
            other => StorageError::SourceMissing(format!("{source}: {other}")),
        })?;
        let dest_path = self.key_path(&dest_key).await.map_err(|e| match e {
            StorageError::InvalidKey(_) => e,
            StorageError::Io(source) => StorageError::DestinationWriteFailed {
                path: dest_key.clone(),
                source,
            },
            other => StorageError::DestinationWriteFailed {
                path: dest_key.clone(),
                source: std::io::Error::other(other.to_string()),
            },
        })?;

        let src = fs::File::open(&source_path)
            .await
            .map_err(|e| StorageError::SourceMissing(format!("{source}: {e}")))?;
        let src_meta = src
            .metadata()
            .await
            .map_err(|e| StorageError::SourceMissing(format!("{source}: {e}")))?;
        if !src_meta.is_file() {
            return Err(StorageError::SourceMissing(format!(
                "{source}: not a regular file"
            )));
        }

        // The destination is created and filled on its own task. A result
        // nobody receives is dropped there, which removes the copy.
        let (tx, rx) = oneshot::channel();
        let task_key = dest_key.clone();
        tokio::spawn(
            async move {
                let written = Self::write_copy(src, task_key, dest_path).await;
                let _ = tx.send(written);
            }
            .in_current_span(),
        );

        let copy = rx.await.map_err(|_| StorageError::DestinationWriteFailed {
            path: dest_key.clone(),
            source: std::io::Error::other("copy task ended without a result"),
        })??;
        tracing::debug!(source, dest = %dest_key, "materialized copy");
        Ok(copy)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        match fs::try_exists(&path).await {
            Ok(exists) => Ok(exists),
            Err(e) if e.kind() == std::io::ErrorKind::NotADirectory => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn inspect(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| Self::not_found(key, e))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(format!("{key}: not a regular file")));
        }

        let content_type = extension_of(key)
            .and_then(|ext| content_type_for(&ext).ok())
            .map(str::to_string);

        Ok(ObjectMeta {
            size: metadata.len(),
            content_type,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn stage_removal(&self, key: &str) -> StorageResult<StagedRemoval> {
        let path = self.key_path(key).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
        let staged = path.with_file_name(format!(".{name}.removing.{}", Uuid::new_v4()));

        fs::rename(&path, &staged)
            .await
            .map_err(|e| Self::not_found(key, e))?;

        Ok(StagedRemoval::new(key.to_string(), path, staged))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn remove_pending(&self, key: &str) -> StorageResult<()> {
        let prefix = format!("{}/", self.pending_dir.trim_end_matches('/'));
        if !key.starts_with(&prefix) {
            return Err(StorageError::InvalidKey(format!(
                "not in the pending area: {key}"
            )));
        }
        let path = self.key_path(key).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| Self::not_found(key, e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {}", e),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
