//! Data models for blob storage operations
//!
//! This module defines the records exchanged with the storage contracts:
//! account credentials, blob descriptors, metadata, access policies, leases
//! and operation responses.

use crate::error::{Result, StowageError};
use crate::utils::{infer_content_type, validate_blob_address};
use base64::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Cursor;
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Shortest fixed lease the service grants, in seconds
pub const MIN_LEASE_SECONDS: u64 = 15;
/// Longest fixed lease the service grants, in seconds
pub const MAX_LEASE_SECONDS: u64 = 60;

/// Credentials for a storage account
#[derive(Clone)]
pub struct StorageAccountInfo {
    pub storage_account_name: String,
    pub access_key: Zeroizing<String>,
    /// Blob endpoint override, e.g. `http://127.0.0.1:10000/devstoreaccount1`
    pub endpoint: Option<String>,
}

impl StorageAccountInfo {
    pub fn new<N: Into<String>, K: Into<String>>(storage_account_name: N, access_key: K) -> Self {
        Self {
            storage_account_name: storage_account_name.into(),
            access_key: Zeroizing::new(access_key.into()),
            endpoint: None,
        }
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Parse `AccountName=...;AccountKey=...[;BlobEndpoint=...]`
    pub fn from_connection_string(connection_string: &str) -> Result<Self> {
        let params = crate::utils::parse_connection_string(connection_string);

        let account_name = params
            .get("AccountName")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| StowageError::config("Invalid connection string: missing AccountName"))?;
        let account_key = params
            .get("AccountKey")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| StowageError::config("Invalid connection string: missing AccountKey"))?;

        let mut info = Self::new(account_name.clone(), account_key.clone());
        info.endpoint = params.get("BlobEndpoint").cloned();
        info.validate()?;
        Ok(info)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage_account_name.trim().is_empty() {
            return Err(StowageError::config("Storage account name is required"));
        }

        if self.access_key.trim().is_empty() {
            return Err(StowageError::config("Storage access key is required"));
        }

        Ok(())
    }

    /// Decode the base64 account key into signing key bytes
    pub fn key_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        BASE64_STANDARD
            .decode(self.access_key.trim())
            .map(Zeroizing::new)
            .map_err(|e| StowageError::config(format!("Storage access key is not valid base64: {e}")))
    }
}

impl fmt::Debug for StorageAccountInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAccountInfo")
            .field("storage_account_name", &self.storage_account_name)
            .field("access_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Key/value tags on a blob; keys are unique
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    entries: BTreeMap<String, String>,
}

impl BlobMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag, failing if the key is already present
    pub fn add<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> Result<()> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(StowageError::invalid_argument(format!(
                "Metadata key '{key}' already exists"
            )));
        }

        self.entries.insert(key, value.into());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.entries.iter()
    }

}

impl From<HashMap<String, String>> for BlobMetadata {
    fn from(map: HashMap<String, String>) -> Self {
        Self {
            entries: map.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<String, String>> for BlobMetadata {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}

/// Byte stream an upload reads from
pub type PayloadReader = Box<dyn AsyncRead + Send + Unpin>;

/// Source of the bytes written by an upload
#[derive(Default)]
pub enum BlobPayload {
    #[default]
    Empty,
    File(PathBuf),
    Bytes(Vec<u8>),
    Reader(Box<dyn AsyncRead + Send + Sync + Unpin>),
}

impl BlobPayload {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Open the payload as a byte stream.
    ///
    /// Files are opened here, so a missing source fails before anything is sent.
    pub async fn into_reader(self) -> Result<PayloadReader> {
        match self {
            Self::Empty => Err(StowageError::invalid_argument(
                "Blob has no payload: set a file path, bytes or a reader",
            )),
            Self::File(path) => {
                let file = tokio::fs::File::open(&path).await.map_err(|e| {
                    StowageError::IoError(std::io::Error::new(
                        e.kind(),
                        format!("Failed to open '{}': {e}", path.display()),
                    ))
                })?;
                Ok(Box::new(file))
            }
            Self::Bytes(data) => Ok(Box::new(Cursor::new(data))),
            Self::Reader(reader) => Ok(reader as PayloadReader),
        }
    }

    /// Drain the payload into memory
    pub async fn read_all(self) -> Result<Vec<u8>> {
        if let Self::Bytes(data) = self {
            return Ok(data);
        }

        let mut reader = self.into_reader().await?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        Ok(data)
    }
}

impl fmt::Debug for BlobPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Bytes(data) => write!(f, "Bytes({} bytes)", data.len()),
            Self::Reader(_) => write!(f, "Reader(..)"),
        }
    }
}

/// A single stored object, in flight or at rest
#[derive(Debug, Default)]
pub struct Blob {
    pub container_name: String,
    pub blob_name: String,
    pub payload: BlobPayload,
    pub content_type: Option<String>,
    pub metadata: BlobMetadata,
    pub blob_uri: Option<BlobUri>,
}

impl Blob {
    pub fn new<C: Into<String>, N: Into<String>>(container_name: C, blob_name: N) -> Self {
        Self {
            container_name: container_name.into(),
            blob_name: blob_name.into(),
            ..Default::default()
        }
    }

    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.payload = BlobPayload::File(path.into());
        self
    }

    pub fn with_bytes<B: Into<Vec<u8>>>(mut self, data: B) -> Self {
        self.payload = BlobPayload::Bytes(data.into());
        self
    }

    pub fn with_reader<R: AsyncRead + Send + Sync + Unpin + 'static>(mut self, reader: R) -> Self {
        self.payload = BlobPayload::Reader(Box::new(reader));
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, metadata: BlobMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn file_path(&self) -> Option<&Path> {
        match &self.payload {
            BlobPayload::File(path) => Some(path),
            _ => None,
        }
    }

    /// `container/blob`, as used in log lines and error messages
    pub fn address(&self) -> String {
        format!("{}/{}", self.container_name, self.blob_name)
    }

    pub fn validate_address(&self) -> Result<()> {
        validate_blob_address(&self.container_name, &self.blob_name)
    }

    /// Explicit content type, or one inferred from the blob name
    pub fn resolved_content_type(&self) -> String {
        self.content_type
            .clone()
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| infer_content_type(&self.blob_name))
    }

    /// Take the payload out, leaving `BlobPayload::Empty` behind
    pub fn take_payload(&mut self) -> BlobPayload {
        std::mem::take(&mut self.payload)
    }

    /// Identity-only copy: address, content type and metadata without payload or URIs
    pub fn descriptor(&self) -> Blob {
        Blob {
            container_name: self.container_name.clone(),
            blob_name: self.blob_name.clone(),
            payload: BlobPayload::Empty,
            content_type: self.content_type.clone(),
            metadata: self.metadata.clone(),
            blob_uri: None,
        }
    }
}

/// Addressing result of a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobUri {
    pub primary_uri: String,
    /// Read-access replica, when the account has one
    pub secondary_uri: Option<String>,
}

/// Set of capability tags granted by an access policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission(u8);

impl Permission {
    pub const NONE: Permission = Permission(0);
    pub const READ: Permission = Permission(1);
    pub const WRITE: Permission = Permission(1 << 1);
    pub const DELETE: Permission = Permission(1 << 2);
    pub const LIST: Permission = Permission(1 << 3);

    pub fn contains(self, other: Permission) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Permission {
    type Output = Permission;

    fn bitor(self, rhs: Permission) -> Permission {
        Permission(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permission {
    fn bitor_assign(&mut self, rhs: Permission) {
        self.0 |= rhs.0;
    }
}

/// A named, time-bounded permission grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub policy_name: String,
    /// Hours from issuance until the grant expires
    pub expiry_hours: u32,
    pub permissions: Permission,
}

impl AccessPolicy {
    const MAX_POLICY_NAME_LENGTH: usize = 64;

    pub fn new<S: Into<String>>(policy_name: S, expiry_hours: u32, permissions: Permission) -> Self {
        Self {
            policy_name: policy_name.into(),
            expiry_hours,
            permissions,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.expiry_hours == 0 {
            return Err(StowageError::invalid_argument(
                "Access policy expiry must be at least one hour",
            ));
        }

        if self.policy_name.trim().is_empty() {
            return Err(StowageError::invalid_argument("Access policy name is required"));
        }

        if self.policy_name.len() > Self::MAX_POLICY_NAME_LENGTH {
            return Err(StowageError::invalid_argument(format!(
                "Access policy name '{}' exceeds {} characters",
                self.policy_name,
                Self::MAX_POLICY_NAME_LENGTH
            )));
        }

        Ok(())
    }
}

/// Delegated-access credential: a signed URI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
}

impl AccessToken {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self { token: token.into() }
    }

    /// Absolute expiry encoded in the token's `se` parameter
    pub fn expires_on(&self) -> Result<chrono::DateTime<chrono::Utc>> {
        crate::blob::sas::expiry_from_token(&self.token)
    }
}

/// Unit of a lease period
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LeaseUnit {
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
}

impl From<&str> for LeaseUnit {
    /// Unrecognized units fall back to seconds
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "ms" | "millisecond" | "milliseconds" => Self::Milliseconds,
            "m" | "min" | "minute" | "minutes" => Self::Minutes,
            "h" | "hour" | "hours" => Self::Hours,
            _ => Self::Seconds,
        }
    }
}

/// Parameters for acquiring a lease
#[derive(Debug)]
pub struct LeaseRequest {
    /// Caller-proposed lease id; the store generates one when absent
    pub lease_id: Option<String>,
    pub lease_period: f64,
    pub unit: LeaseUnit,
    pub blob: Blob,
}

impl LeaseRequest {
    pub fn new(blob: Blob, lease_period: f64, unit: LeaseUnit) -> Self {
        Self {
            lease_id: None,
            lease_period,
            unit,
            blob,
        }
    }

    pub fn with_lease_id<S: Into<String>>(mut self, lease_id: S) -> Self {
        self.lease_id = Some(lease_id.into());
        self
    }

    /// Lease period normalized to a duration
    pub fn duration(&self) -> Result<Duration> {
        if !self.lease_period.is_finite() || self.lease_period <= 0.0 {
            return Err(StowageError::invalid_argument(format!(
                "Lease period must be a positive number, got {}",
                self.lease_period
            )));
        }

        let seconds = match self.unit {
            LeaseUnit::Milliseconds => self.lease_period / 1000.0,
            LeaseUnit::Seconds => self.lease_period,
            LeaseUnit::Minutes => self.lease_period * 60.0,
            LeaseUnit::Hours => self.lease_period * 3600.0,
        };

        Duration::try_from_secs_f64(seconds)
            .map_err(|e| StowageError::invalid_argument(format!("Invalid lease period: {e}")))
    }

    /// Lease duration in whole seconds, within the range the service accepts
    pub fn lease_seconds(&self) -> Result<u8> {
        let seconds = self.duration()?.as_secs();

        if !(MIN_LEASE_SECONDS..=MAX_LEASE_SECONDS).contains(&seconds) {
            return Err(StowageError::invalid_argument(format!(
                "Lease duration must be between {MIN_LEASE_SECONDS} and {MAX_LEASE_SECONDS} seconds, got {seconds}"
            )));
        }

        Ok(seconds as u8)
    }

    /// Caller-proposed lease id, if one was supplied
    pub fn proposed_lease_id(&self) -> Result<Option<Uuid>> {
        match self.lease_id.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(id) => Uuid::parse_str(id).map(Some).map_err(|e| {
                StowageError::invalid_argument(format!("Lease id '{id}' is not a valid identifier: {e}"))
            }),
        }
    }
}

/// Result of a lease attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseResponse {
    pub is_success: bool,
    pub lease_id: Option<String>,
}

impl LeaseResponse {
    pub fn acquired<S: Into<String>>(lease_id: S) -> Self {
        Self {
            is_success: true,
            lease_id: Some(lease_id.into()),
        }
    }
}

/// Result of an upload
#[derive(Debug)]
pub struct BlobResponse {
    pub is_success: bool,
    pub failure_message: Option<String>,
    pub blob_uri: Option<BlobUri>,
    /// The uploaded blob, echoed back with `blob_uri` set
    pub blob: Option<Blob>,
}

impl BlobResponse {
    pub fn succeeded(blob: Blob) -> Self {
        Self {
            is_success: true,
            failure_message: None,
            blob_uri: blob.blob_uri.clone(),
            blob: Some(blob),
        }
    }

    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self {
            is_success: false,
            failure_message: Some(message.into()),
            blob_uri: None,
            blob: None,
        }
    }
}

/// Upload tuning; affects request shape only, never stored content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferOptions {
    /// Payloads up to this size go up in a single request
    pub single_upload_threshold: u64,
    /// Block size for larger payloads
    pub block_size: usize,
    /// Parallel block uploads
    pub max_concurrency: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            single_upload_threshold: 1024 * 1024,
            block_size: 1024 * 1024,
            max_concurrency: 2,
        }
    }
}

impl TransferOptions {
    pub fn validate(&self) -> Result<()> {
        if self.single_upload_threshold == 0 || self.block_size == 0 || self.max_concurrency == 0 {
            return Err(StowageError::config(
                "Transfer options must be positive: single_upload_threshold, block_size, max_concurrency",
            ));
        }

        Ok(())
    }
}
