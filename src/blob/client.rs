//! Storage and lease contracts
//!
//! Backends implement [`BlobStorageClient`] for object operations and,
//! when the store supports it, [`BlobLease`] for exclusive leases. The two
//! are kept apart so a backend without leasing can still serve the first.
//!
//! Every operation propagates failures as [`StowageError`](crate::error::StowageError);
//! nothing is masked into a result value.

use crate::blob::models::*;
use crate::error::Result;
use async_trait::async_trait;
use tokio::io::AsyncWrite;

/// Upload, download, metadata, overwrite and delegated-access operations
#[async_trait]
pub trait BlobStorageClient: Send + Sync {
    /// Write the blob's payload to the store, replacing any existing object.
    ///
    /// Content type and metadata are applied as store attributes. The returned
    /// response echoes the blob with its URI pair filled in.
    async fn upload_blob(&self, blob: Blob) -> Result<BlobResponse>;

    /// Stream the blob's full content into `writer`.
    ///
    /// The blob's content type is refreshed; its metadata is replaced with the
    /// stored metadata when `fetch_metadata` is true.
    async fn download_blob(
        &self,
        blob: &mut Blob,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        fetch_metadata: bool,
    ) -> Result<()>;

    /// Populate content type and metadata without transferring payload bytes
    async fn get_blob_metadata(&self, blob: &mut Blob) -> Result<()>;

    /// Snapshot `original`, then overwrite it with `replacement`'s payload.
    ///
    /// Only the payload of `replacement` is used; the write goes to the
    /// original's address with the original descriptor's content type and metadata.
    async fn change_blob(&self, original: &Blob, replacement: Blob) -> Result<bool>;

    /// Register `policy` on the blob's container and issue a signed URI for the blob
    async fn get_delegated_access_token(
        &self,
        blob: &Blob,
        policy: &AccessPolicy,
    ) -> Result<AccessToken>;
}

/// Exclusive, time-bounded leases on blobs
#[async_trait]
pub trait BlobLease: Send + Sync {
    /// Acquire (or renew, when the request carries the current lease id) a lease
    async fn acquire_lease(&self, request: &LeaseRequest) -> Result<LeaseResponse>;
}
