//! In-memory blob store
//!
//! A process-local backend that honours the same contracts as the Azure
//! adapter: snapshots on overwrite, stored access policies (at most five per
//! container), signed tokens, and expiring exclusive leases. Useful for tests
//! and for running against no account at all.

use crate::blob::azure::secondary_uri;
use crate::blob::client::{BlobLease, BlobStorageClient};
use crate::blob::models::*;
use crate::blob::sas::BlobSasGrant;
use crate::error::{Result, StowageError};
use crate::utils::datetime::expiry_after_hours;
use crate::utils::{format_size, validate_container_name};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::HashMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// Stored access policies a container may hold
pub const MAX_STORED_POLICIES: usize = 5;

/// Read-only copy of a blob taken before an overwrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSnapshot {
    pub taken_at: DateTime<Utc>,
    pub data: Vec<u8>,
    pub content_type: String,
    pub metadata: BlobMetadata,
}

/// A named policy registered on a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPolicy {
    pub id: String,
    pub start: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub permissions: Permission,
}

#[derive(Debug, Clone)]
struct ActiveLease {
    lease_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Vec<u8>,
    content_type: String,
    metadata: BlobMetadata,
    snapshots: Vec<BlobSnapshot>,
    lease: Option<ActiveLease>,
}

impl StoredBlob {
    fn active_lease(&self, now: DateTime<Utc>) -> Option<&ActiveLease> {
        self.lease.as_ref().filter(|lease| lease.expires_at > now)
    }
}

#[derive(Debug, Default)]
struct ContainerState {
    blobs: HashMap<String, StoredBlob>,
    policies: Vec<StoredPolicy>,
}

/// Storage backend held entirely in process memory
#[derive(Debug)]
pub struct MemoryBlobStore {
    account: StorageAccountInfo,
    base_url: String,
    containers: RwLock<HashMap<String, ContainerState>>,
}

impl MemoryBlobStore {
    /// Create an empty store that signs tokens with the account's key
    pub fn new(account: StorageAccountInfo) -> Result<Self> {
        account.validate()?;
        account.key_bytes()?;

        let base_url = format!(
            "https://{}.blob.core.windows.net",
            account.storage_account_name
        );

        Ok(Self {
            account,
            base_url,
            containers: RwLock::new(HashMap::new()),
        })
    }

    /// Address blobs under a different base, e.g. an emulator endpoint
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Create a container; creating an existing one is a no-op
    pub async fn create_container(&self, container_name: &str) -> Result<()> {
        validate_container_name(container_name)?;

        let mut containers = self.containers.write().await;
        if containers.contains_key(container_name) {
            debug!("Container {} already exists", container_name);
        } else {
            containers.insert(container_name.to_string(), ContainerState::default());
            info!("Created container: {}", container_name);
        }

        Ok(())
    }

    /// Snapshots of a blob, oldest first
    pub async fn snapshots(&self, container_name: &str, blob_name: &str) -> Result<Vec<BlobSnapshot>> {
        let containers = self.containers.read().await;
        let stored = stored_blob(&containers, container_name, blob_name)?;
        Ok(stored.snapshots.clone())
    }

    /// Stored access policies registered on a container
    pub async fn stored_policies(&self, container_name: &str) -> Result<Vec<StoredPolicy>> {
        let containers = self.containers.read().await;
        Ok(container(&containers, container_name)?.policies.clone())
    }

    fn blob_uri(&self, blob: &Blob) -> Result<BlobUri> {
        let mut primary = Url::parse(&self.base_url)?;
        primary
            .path_segments_mut()
            .map_err(|_| {
                StowageError::config(format!("Base URL '{}' cannot hold a path", self.base_url))
            })?
            .pop_if_empty()
            .push(&blob.container_name)
            .extend(blob.blob_name.split('/'));

        Ok(BlobUri {
            primary_uri: primary.to_string(),
            secondary_uri: secondary_uri(&primary),
        })
    }
}

fn container<'a>(
    containers: &'a HashMap<String, ContainerState>,
    container_name: &str,
) -> Result<&'a ContainerState> {
    containers
        .get(container_name)
        .ok_or_else(|| StowageError::not_found(format!("Container '{container_name}' not found")))
}

fn container_mut<'a>(
    containers: &'a mut HashMap<String, ContainerState>,
    container_name: &str,
) -> Result<&'a mut ContainerState> {
    containers
        .get_mut(container_name)
        .ok_or_else(|| StowageError::not_found(format!("Container '{container_name}' not found")))
}

fn stored_blob<'a>(
    containers: &'a HashMap<String, ContainerState>,
    container_name: &str,
    blob_name: &str,
) -> Result<&'a StoredBlob> {
    container(containers, container_name)?
        .blobs
        .get(blob_name)
        .ok_or_else(|| {
            StowageError::not_found(format!("Blob '{container_name}/{blob_name}' not found"))
        })
}

/// Writes without a lease id are refused while someone holds the lease
fn ensure_not_leased(stored: Option<&StoredBlob>, address: &str, now: DateTime<Utc>) -> Result<()> {
    match stored.and_then(|blob| blob.active_lease(now)) {
        Some(_) => Err(StowageError::conflict(format!(
            "There is currently a lease on '{address}' and no lease id was specified"
        ))),
        None => Ok(()),
    }
}

#[async_trait]
impl BlobStorageClient for MemoryBlobStore {
    async fn upload_blob(&self, mut blob: Blob) -> Result<BlobResponse> {
        blob.validate_address()?;
        let address = blob.address();

        let payload = blob.take_payload();
        let source_path = match &payload {
            BlobPayload::File(path) => Some(path.clone()),
            _ => None,
        };
        let data = payload.read_all().await?;
        let size = data.len() as u64;
        let content_type = blob.resolved_content_type();

        {
            let mut containers = self.containers.write().await;
            let container = container_mut(&mut containers, &blob.container_name)?;
            let existing = container.blobs.get(&blob.blob_name);
            ensure_not_leased(existing, &address, Utc::now())?;

            let (snapshots, lease) = existing
                .map(|stored| (stored.snapshots.clone(), stored.lease.clone()))
                .unwrap_or_default();

            container.blobs.insert(
                blob.blob_name.clone(),
                StoredBlob {
                    data,
                    content_type: content_type.clone(),
                    metadata: blob.metadata.clone(),
                    snapshots,
                    lease,
                },
            );
        }

        blob.content_type = Some(content_type);
        blob.blob_uri = Some(self.blob_uri(&blob)?);
        if let Some(path) = source_path {
            blob.payload = BlobPayload::File(path);
        }

        info!("Uploaded {} ({})", address, format_size(size));
        Ok(BlobResponse::succeeded(blob))
    }

    async fn download_blob(
        &self,
        blob: &mut Blob,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        fetch_metadata: bool,
    ) -> Result<()> {
        blob.validate_address()?;

        let (data, content_type, metadata) = {
            let containers = self.containers.read().await;
            let stored = stored_blob(&containers, &blob.container_name, &blob.blob_name)?;
            (stored.data.clone(), stored.content_type.clone(), stored.metadata.clone())
        };

        if !data.is_empty() {
            writer.write_all(&data).await?;
        }
        writer.flush().await?;

        blob.content_type = Some(content_type);
        if fetch_metadata {
            blob.metadata = metadata;
        }

        debug!(
            "Downloaded {} ({})",
            blob.address(),
            format_size(data.len() as u64)
        );
        Ok(())
    }

    async fn get_blob_metadata(&self, blob: &mut Blob) -> Result<()> {
        blob.validate_address()?;

        let containers = self.containers.read().await;
        let stored = stored_blob(&containers, &blob.container_name, &blob.blob_name)?;
        blob.content_type = Some(stored.content_type.clone());
        blob.metadata = stored.metadata.clone();

        Ok(())
    }

    async fn change_blob(&self, original: &Blob, mut replacement: Blob) -> Result<bool> {
        original.validate_address()?;
        let address = original.address();
        let data = replacement.take_payload().read_all().await?;

        let mut containers = self.containers.write().await;
        let container = container_mut(&mut containers, &original.container_name)?;
        let stored = container.blobs.get_mut(&original.blob_name).ok_or_else(|| {
            StowageError::not_found(format!("Blob '{address}' not found"))
        })?;

        let now = Utc::now();
        ensure_not_leased(Some(stored), &address, now)?;

        stored.snapshots.push(BlobSnapshot {
            taken_at: now,
            data: std::mem::take(&mut stored.data),
            content_type: stored.content_type.clone(),
            metadata: stored.metadata.clone(),
        });
        debug!("Created snapshot {} of {}", stored.snapshots.len(), address);

        stored.data = data;
        stored.content_type = original.resolved_content_type();
        stored.metadata = original.metadata.clone();

        info!("Overwrote {} after snapshot", address);
        Ok(true)
    }

    async fn get_delegated_access_token(
        &self,
        blob: &Blob,
        policy: &AccessPolicy,
    ) -> Result<AccessToken> {
        policy.validate()?;
        blob.validate_address()?;

        let now = Utc::now().trunc_subsecs(0);
        let expiry = expiry_after_hours(now, policy.expiry_hours);

        {
            let mut containers = self.containers.write().await;
            let container = container_mut(&mut containers, &blob.container_name)?;
            let replaces_existing = container
                .policies
                .iter()
                .any(|existing| existing.id == policy.policy_name);

            if !replaces_existing && container.policies.len() >= MAX_STORED_POLICIES {
                return Err(StowageError::invalid_argument(format!(
                    "Container '{}' already holds {MAX_STORED_POLICIES} stored access policies",
                    blob.container_name
                )));
            }

            container
                .policies
                .retain(|existing| existing.id != policy.policy_name);
            container.policies.push(StoredPolicy {
                id: policy.policy_name.clone(),
                start: now,
                expiry,
                permissions: policy.permissions,
            });
        }

        let key = self.account.key_bytes()?;
        let query = BlobSasGrant {
            account: &self.account.storage_account_name,
            container: &blob.container_name,
            blob: &blob.blob_name,
            permissions: policy.permissions,
            expiry,
        }
        .to_query(&key)?;

        let uri = self.blob_uri(blob)?;
        info!(
            "Issued delegated access token for {} under policy {}",
            blob.address(),
            policy.policy_name
        );
        Ok(AccessToken::new(format!("{}?{}", uri.primary_uri, query)))
    }
}

#[async_trait]
impl BlobLease for MemoryBlobStore {
    async fn acquire_lease(&self, request: &LeaseRequest) -> Result<LeaseResponse> {
        let seconds = request.lease_seconds()?;
        let proposed = request.proposed_lease_id()?;
        request.blob.validate_address()?;
        let address = request.blob.address();

        let mut containers = self.containers.write().await;
        let container = container_mut(&mut containers, &request.blob.container_name)?;
        let stored = container
            .blobs
            .get_mut(&request.blob.blob_name)
            .ok_or_else(|| StowageError::not_found(format!("Blob '{address}' not found")))?;

        let now = Utc::now();
        let lease_id = match (stored.active_lease(now), proposed) {
            (Some(current), Some(proposed)) if current.lease_id == proposed.to_string() => {
                debug!("Renewing lease {} on {}", current.lease_id, address);
                current.lease_id.clone()
            }
            (Some(_), _) => {
                return Err(StowageError::conflict(format!(
                    "There is already a lease present on '{address}'"
                )));
            }
            (None, Some(proposed)) => proposed.to_string(),
            (None, None) => Uuid::new_v4().to_string(),
        };

        stored.lease = Some(ActiveLease {
            lease_id: lease_id.clone(),
            expires_at: now + chrono::Duration::seconds(i64::from(seconds)),
        });

        info!("Acquired {}s lease {} on {}", seconds, lease_id, address);
        Ok(LeaseResponse::acquired(lease_id))
    }
}
