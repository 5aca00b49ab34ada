//! stowage - vendor-neutral blob storage
//!
//! Upload, download, metadata, snapshot-then-overwrite, delegated access
//! tokens and exclusive leases behind backend-agnostic async traits, with an
//! Azure Blob Storage adapter and an in-memory backend.

pub mod blob;
pub mod config;
pub mod error;
pub mod utils;

// Re-export commonly used types
pub use error::{Result, StowageError};
