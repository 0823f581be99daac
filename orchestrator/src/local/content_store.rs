//! Filesystem content store.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::collaborators::{CollabResult, ContentLabel, ContentStore};
use crate::error::CollaboratorError;

/// Content address of a byte sequence: `sha256-<hex>`.
pub fn content_address(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256-{}", hex::encode(hasher.finalize()))
}

/// Blobs stored under `<root>/blobs/<first 4 hex chars>/<address>`.
pub struct FsContentStore {
    root_dir: PathBuf,
}

impl FsContentStore {
    pub async fn new<P: AsRef<Path>>(root_dir: P) -> CollabResult<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        fs::create_dir_all(&root_dir).await?;

        info!(path = %root_dir.display(), "Initialized content store");

        Ok(Self { root_dir })
    }

    fn blob_path(&self, address: &str) -> CollabResult<PathBuf> {
        let hash = address
            .strip_prefix("sha256-")
            .filter(|h| h.len() == 64 && h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| CollaboratorError::NotFound(format!("invalid address {}", address)))?;

        Ok(self.root_dir.join("blobs").join(&hash[..4]).join(address))
    }

    pub async fn exists(&self, address: &str) -> bool {
        match self.blob_path(address) {
            Ok(path) => fs::metadata(path).await.is_ok(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn put(&self, bytes: &[u8], label: &ContentLabel) -> CollabResult<String> {
        let address = content_address(bytes);
        let path = self.blob_path(&address)?;

        if fs::metadata(&path).await.is_ok() {
            debug!(address = %address, "Blob already stored");
            return Ok(address);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write then rename so a reader never sees a partial blob.
        let partial = path.with_extension(format!("partial-{}", uuid::Uuid::new_v4()));
        fs::write(&partial, bytes).await?;
        fs::rename(&partial, &path).await?;

        info!(address = %address, size = bytes.len(), label = %label.name, "Stored blob");
        Ok(address)
    }

    async fn get(&self, address: &str) -> CollabResult<Vec<u8>> {
        let path = self.blob_path(address)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CollaboratorError::NotFound(address.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
