//! Scoped guards for filesystem side effects.
//!
//! Both guards undo their effect when dropped unsettled, so a failed or
//! cancelled unit of work never leaves a stray file behind.

use crate::error::{StorageError, StorageResult};
use std::path::PathBuf;
use tokio::fs;

/// A freshly materialized copy that is deleted on drop unless kept.
#[derive(Debug)]
#[must_use = "dropping a MaterializedFile deletes the copy"]
pub struct MaterializedFile {
    key: String,
    path: PathBuf,
    armed: bool,
}

impl MaterializedFile {
    pub(crate) fn new(key: String, path: PathBuf) -> Self {
        Self {
            key,
            path,
            armed: true,
        }
    }

    /// Storage key of the copy.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Disarm the guard and keep the copy, returning its key.
    pub fn keep(mut self) -> String {
        self.armed = false;
        std::mem::take(&mut self.key)
    }

    /// Delete the copy now, reporting failures.
    pub async fn discard(mut self) -> StorageResult<()> {
        self.armed = false;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

impl Drop for MaterializedFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(key = %self.key, "removed unkept copy"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::error!(key = %self.key, error = %e, "failed to remove unkept copy"),
        }
    }
}

/// A file moved aside pending a decision.
///
/// Dropping the guard without settling it restores the file.
#[derive(Debug)]
#[must_use = "dropping a StagedRemoval restores the file"]
pub struct StagedRemoval {
    key: String,
    original: PathBuf,
    staged: PathBuf,
    settled: bool,
}

impl StagedRemoval {
    pub(crate) fn new(key: String, original: PathBuf, staged: PathBuf) -> Self {
        Self {
            key,
            original,
            staged,
            settled: false,
        }
    }

    /// Storage key of the file being removed.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Delete the staged file permanently.
    pub async fn finish(mut self) -> StorageResult<()> {
        self.settled = true;
        match fs::remove_file(&self.staged).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Move the staged file back to its original location.
    pub async fn restore(mut self) -> StorageResult<()> {
        self.settled = true;
        fs::rename(&self.staged, &self.original).await?;
        Ok(())
    }
}

impl Drop for StagedRemoval {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        match std::fs::rename(&self.staged, &self.original) {
            Ok(()) => tracing::debug!(key = %self.key, "restored staged file"),
            Err(e) => tracing::error!(key = %self.key, error = %e, "failed to restore staged file"),
        }
    }
}
