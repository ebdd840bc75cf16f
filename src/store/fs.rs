//! Filesystem object store.
//!
//! Writes go to a temp file in the destination directory and are then
//! persisted over the final path, so a reader never sees a half-written
//! artifact.

use super::ObjectStore;
use crate::error::IngestError;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Artifacts stored as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `key` under the root, rejecting absolute keys and `..`.
    fn path_for(&self, key: &str) -> Result<PathBuf, IngestError> {
        let rel = Path::new(key);
        let clean = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(IngestError::Persistence(format!(
                "invalid object key '{key}'"
            )));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), IngestError> {
        let path = self.path_for(key)?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| IngestError::Persistence(format!("create {}: {e}", dir.display())))?;

        let target = path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| IngestError::Internal(format!("write task panicked: {e}")))?
        .map_err(|e| IngestError::Persistence(format!("write {}: {e}", path.display())))?;

        debug!(key, "artifact stored");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, IngestError> {
        let path = self.path_for(key)?;
        fs::read(&path)
            .await
            .map_err(|e| IngestError::ArtifactUnavailable {
                path: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), IngestError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IngestError::Persistence(format!(
                "delete {}: {e}",
                path.display()
            ))),
        }
    }
}
