//! Extended blob storage operations
//!
//! Convenience operations built on top of [`BlobStorageClient`]: batch
//! uploads, existence checks and downloads into files or memory. Available
//! on every backend through a blanket implementation.

use crate::blob::client::BlobStorageClient;
use crate::blob::models::*;
use crate::error::{Result, StowageError};
use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[async_trait]
pub trait BlobStorageExt: BlobStorageClient {
    /// Upload several blobs one after another.
    ///
    /// A failed item is reported in its own response and does not stop the batch.
    async fn upload_blobs(&self, blobs: Vec<Blob>) -> Vec<BlobResponse> {
        let mut responses = Vec::with_capacity(blobs.len());

        for blob in blobs {
            let address = blob.address();
            let response = match self.upload_blob(blob).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Upload of {} failed: {}", address, e);
                    BlobResponse::failed(e.to_string())
                }
            };
            responses.push(response);
        }

        responses
    }

    /// Check if a blob exists
    async fn blob_exists(&self, container_name: &str, blob_name: &str) -> Result<bool> {
        let mut blob = Blob::new(container_name, blob_name);
        match self.get_blob_metadata(&mut blob).await {
            Ok(()) => Ok(true),
            Err(StowageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Download a blob into a local file, creating parent directories as needed
    async fn download_blob_to_path(
        &self,
        blob: &mut Blob,
        path: &Path,
        fetch_metadata: bool,
    ) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(path).await?;
        let result = self.download_blob(blob, &mut file, fetch_metadata).await;

        if result.is_err() {
            drop(file);
            // Leave no partial file behind
            if let Err(e) = tokio::fs::remove_file(path).await {
                debug!("Could not remove partial download {}: {}", path.display(), e);
            }
            return result;
        }

        file.flush().await?;
        debug!("Saved {} to {}", blob.address(), path.display());
        Ok(())
    }

    /// Download a blob's content into memory
    async fn download_blob_to_vec(&self, blob: &mut Blob, fetch_metadata: bool) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.download_blob(blob, &mut buffer, fetch_metadata).await?;
        Ok(buffer)
    }
}

impl<T: BlobStorageClient + ?Sized> BlobStorageExt for T {}
