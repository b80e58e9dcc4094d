//! # Local blob store
//!
//! Filesystem implementation of `BlobStore`. Blob paths are relative keys
//! such as `profile_images/ab/cd/<hash>.jpg`; callers that name blobs by
//! content hash get deduplication for free since an existing file is never
//! rewritten. Writes land in a temporary sibling first and are renamed into
//! place, so a blob path only ever holds complete content.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use domains::ports::{BlobHandle, BlobStore, StoreError};
use mime::Mime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use uuid::Uuid;

pub struct LocalBlobStore {
    /// Root directory for all blobs (e.g., "./data/blobs")
    root_path: PathBuf,
    /// Public URL prefix (e.g., "/static/blobs")
    url_prefix: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root_path: root.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Resolves a relative blob key under the root, refusing anything that
    /// could escape it.
    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(StoreError::InvalidField {
                path: key.to_owned(),
                field: "path".into(),
                reason: "blob paths must be relative and stay under the store root".into(),
            });
        }
        Ok(self.root_path.join(relative))
    }
}

fn io_error(err: std::io::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// Hidden, uniquely named sibling of `target` in the same directory.
fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4().simple()))
}

async fn write_then_rename(staging: &Path, target: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(staging).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(staging, target).await
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        content_type: &Mime,
    ) -> Result<BlobHandle, StoreError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        if fs::try_exists(&target).await.map_err(io_error)? {
            debug!("blob already stored, skipping write");
        } else {
            let staging = staging_path(&target);
            if let Err(err) = write_then_rename(&staging, &target, &data).await {
                let _ = fs::remove_file(&staging).await;
                return Err(io_error(err));
            }
            debug!("blob written");
        }

        Ok(BlobHandle(path.to_owned()))
    }

    async fn download_url(&self, handle: &BlobHandle) -> Result<String, StoreError> {
        let target = self.resolve(&handle.0)?;
        if !fs::try_exists(&target).await.map_err(io_error)? {
            return Err(StoreError::NotFound(handle.0.clone()));
        }
        Ok(format!("{}/{}", self.url_prefix, handle.0))
    }
}
