//! Blob storage access
//!
//! Storage contracts and the records they exchange, an Azure Blob Storage
//! adapter, an in-memory backend, and service SAS signing.

pub mod azure;
pub mod client;
pub mod memory;
pub mod models;
pub mod operations;
pub mod sas;
pub mod transfer;

// Re-export commonly used types
pub use azure::{create_blob_client, AzureBlobStorageClient};
pub use client::{BlobLease, BlobStorageClient};
pub use memory::{BlobSnapshot, MemoryBlobStore, StoredPolicy};
pub use models::*;
pub use operations::BlobStorageExt;
