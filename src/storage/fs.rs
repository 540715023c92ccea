//! Filesystem storage backend.
//!
//! Maps `file://` URIs (and bare paths) onto the local filesystem. This
//! backs local pipeline runs and tests; cloud buckets sit behind the same
//! trait in deployments that have them.

use crate::error::{Error, Result};
use crate::storage::ObjectStorage;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Local filesystem implementation of `ObjectStorage`.
#[derive(Debug, Clone, Default)]
pub struct FsStorage;

impl FsStorage {
    /// Create a filesystem storage backend.
    pub fn new() -> Self {
        Self
    }

    /// Strip the `file://` scheme if present; reject other schemes.
    fn to_path(uri: &str) -> Result<PathBuf> {
        if let Some(rest) = uri.strip_prefix("file://") {
            return Ok(PathBuf::from(rest));
        }
        if uri.contains("://") {
            return Err(Error::Storage(format!(
                "unsupported storage scheme in '{}'",
                uri
            )));
        }
        Ok(PathBuf::from(uri))
    }
}

#[async_trait]
impl ObjectStorage for FsStorage {
    async fn exists(&self, uri: &str) -> Result<bool> {
        let path = Self::to_path(uri)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn write(&self, uri: &str, data: &[u8]) -> Result<()> {
        let path = Self::to_path(uri)?;
        if let Some(parent) = path.parent().filter(|p| *p != Path::new("")) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(())
    }
}
