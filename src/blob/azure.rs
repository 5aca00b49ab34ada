//! Azure Blob Storage adapter
//!
//! Implements the storage and lease contracts on top of the
//! `azure_storage_blobs` SDK. The service client is built once from the
//! account credentials; container and blob clients are resolved on every call.

use crate::blob::client::{BlobLease, BlobStorageClient};
use crate::blob::models::{
    AccessPolicy, AccessToken, Blob, BlobMetadata, BlobPayload, BlobResponse, BlobUri,
    LeaseRequest, LeaseResponse, Permission, StorageAccountInfo, TransferOptions,
};
use crate::blob::sas::permission_string;
use crate::blob::transfer::{plan_upload, BlockReader, UploadPlan};
use crate::error::{Result, StowageError};
use crate::utils::datetime::{expiry_after_hours, to_offset_datetime};
use crate::utils::format_size;
use crate::utils::network::classify_azure_error;
use crate::utils::validate_container_name;
use async_trait::async_trait;
use azure_core::error::ErrorKind;
use azure_core::request_options::{LeaseDuration, LeaseId, Metadata, ProposedLeaseId};
use azure_core::StatusCode;
use azure_storage::prelude::*;
use azure_storage::shared_access_signature::service_sas::BlobSasPermissions;
use azure_storage::CloudLocation;
use azure_storage_blobs::prelude::*;
use chrono::Utc;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::HashMap;
use std::fmt;
use time::OffsetDateTime;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use url::Url;

/// Port Azurite listens on for the blob service
const EMULATOR_DEFAULT_PORT: u16 = 10000;

/// Storage client backed by an Azure storage account
#[derive(Clone)]
pub struct AzureBlobStorageClient {
    account_name: String,
    service_client: BlobServiceClient,
    transfer: TransferOptions,
}

impl fmt::Debug for AzureBlobStorageClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureBlobStorageClient")
            .field("account_name", &self.account_name)
            .field("transfer", &self.transfer)
            .finish()
    }
}

impl AzureBlobStorageClient {
    /// Create a client with the default transfer options
    pub fn new(account: StorageAccountInfo) -> Result<Self> {
        Self::with_transfer_options(account, TransferOptions::default())
    }

    pub fn with_transfer_options(
        account: StorageAccountInfo,
        transfer: TransferOptions,
    ) -> Result<Self> {
        account.validate()?;
        transfer.validate()?;

        let credentials = StorageCredentials::access_key(
            account.storage_account_name.clone(),
            account.access_key.as_str().to_owned(),
        );

        let service_client = match account.endpoint.as_deref() {
            Some(endpoint) => {
                let location = emulator_location(endpoint)?;
                debug!("Using custom blob endpoint: {}", endpoint);
                ClientBuilder::with_location(location, credentials).blob_service_client()
            }
            None => BlobServiceClient::new(account.storage_account_name.clone(), credentials),
        };

        info!(
            "Created Azure blob storage client for account {}",
            account.storage_account_name
        );

        Ok(Self {
            account_name: account.storage_account_name,
            service_client,
            transfer,
        })
    }

    /// Get the storage account name
    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn transfer_options(&self) -> &TransferOptions {
        &self.transfer
    }

    /// Create the container if it does not exist yet
    pub async fn ensure_container(&self, container_name: &str) -> Result<()> {
        validate_container_name(container_name)?;

        let container_client = self.service_client.container_client(container_name);
        let exists = container_client.exists().await.map_err(|e| {
            classify_azure_error(&e, &format!("Failed to check container '{container_name}'"))
        })?;

        if exists {
            debug!("Container {} already exists", container_name);
            return Ok(());
        }

        match container_client.create().await {
            Ok(_) => {
                info!("Created container: {}", container_name);
                Ok(())
            }
            Err(e) => {
                let error = classify_azure_error(
                    &e,
                    &format!("Failed to create container '{container_name}'"),
                );
                // Lost a creation race with another caller
                if error.is_conflict() {
                    debug!("Container {} already exists", container_name);
                    Ok(())
                } else {
                    Err(error)
                }
            }
        }
    }

    fn blob_client(&self, blob: &Blob) -> Result<BlobClient> {
        blob.validate_address()?;

        let container_client = self.service_client.container_client(&blob.container_name);
        Ok(container_client.blob_client(&blob.blob_name))
    }

    /// Write a planned upload, returning the number of bytes sent
    async fn put_payload(
        &self,
        blob_client: &BlobClient,
        address: &str,
        plan: UploadPlan,
        content_type: &str,
        metadata: &BlobMetadata,
    ) -> Result<u64> {
        let data = match plan {
            UploadPlan::Single(data) => data,
            UploadPlan::Blocks(blocks) => {
                return self
                    .put_blocks(blob_client, address, blocks, content_type, metadata)
                    .await
            }
        };

        let size = data.len() as u64;
        debug!(
            "Uploading {} to {} in a single request",
            format_size(size),
            address
        );

        blob_client
            .put_block_blob(data)
            .content_type(content_type.to_string())
            .metadata(to_sdk_metadata(metadata))
            .await
            .map_err(|e| classify_azure_error(&e, &format!("Failed to upload blob '{address}'")))?;

        Ok(size)
    }

    /// Stage blocks as they are read, keeping at most `max_concurrency` in flight
    async fn put_blocks(
        &self,
        blob_client: &BlobClient,
        address: &str,
        mut blocks: BlockReader,
        content_type: &str,
        metadata: &BlobMetadata,
    ) -> Result<u64> {
        let concurrency = self.transfer.max_concurrency;
        let mut in_flight = FuturesUnordered::new();
        let mut block_ids = Vec::new();
        let mut size = 0u64;

        while let Some((id, chunk)) = blocks.next_block().await? {
            size += chunk.len() as u64;
            block_ids.push(id.clone());

            let blob_client = blob_client.clone();
            in_flight.push(async move { blob_client.put_block(id, chunk).await.map(|_| ()) });

            if in_flight.len() >= concurrency {
                if let Some(result) = in_flight.next().await {
                    result.map_err(|e| {
                        classify_azure_error(&e, &format!("Failed to upload block for '{address}'"))
                    })?;
                }
            }
        }

        while let Some(result) = in_flight.next().await {
            result.map_err(|e| {
                classify_azure_error(&e, &format!("Failed to upload block for '{address}'"))
            })?;
        }

        let block_count = block_ids.len();
        debug!(
            "Staged {} in {} blocks for {} ({} concurrent)",
            format_size(size),
            block_count,
            address,
            concurrency
        );

        // Commit in index order regardless of upload completion order
        let block_list = BlockList {
            blocks: block_ids
                .into_iter()
                .map(BlobBlockType::new_uncommitted)
                .collect(),
        };

        blob_client
            .put_block_list(block_list)
            .content_type(content_type.to_string())
            .metadata(to_sdk_metadata(metadata))
            .await
            .map_err(|e| {
                classify_azure_error(
                    &e,
                    &format!("Failed to commit {block_count} blocks for '{address}'"),
                )
            })?;

        Ok(size)
    }

    /// Upsert the named stored access policy on a container, keeping the others
    async fn register_policy(
        &self,
        container_name: &str,
        policy: &AccessPolicy,
        start: OffsetDateTime,
        expiry: OffsetDateTime,
    ) -> Result<()> {
        let container_client = self.service_client.container_client(container_name);

        let current = container_client.get_acl().await.map_err(|e| {
            classify_azure_error(&e, &format!("Failed to read access policies of '{container_name}'"))
        })?;

        let mut policies = current.stored_access_policy_list;
        policies
            .stored_access
            .retain(|existing| existing.id != policy.policy_name);
        policies.stored_access.push(StoredAccessPolicy::new(
            policy.policy_name.clone(),
            start,
            expiry,
            permission_string(policy.permissions),
        ));

        container_client
            .set_acl(current.public_access)
            .stored_access_policy_list(policies)
            .await
            .map_err(|e| {
                classify_azure_error(
                    &e,
                    &format!("Failed to register access policy '{}' on '{container_name}'", policy.policy_name),
                )
            })?;

        debug!(
            "Registered access policy {} on container {}",
            policy.policy_name, container_name
        );
        Ok(())
    }
}

#[async_trait]
impl BlobStorageClient for AzureBlobStorageClient {
    async fn upload_blob(&self, mut blob: Blob) -> Result<BlobResponse> {
        let blob_client = self.blob_client(&blob)?;
        let address = blob.address();

        let payload = blob.take_payload();
        let source_path = blob_source_path(&payload);
        let plan = plan_upload(payload.into_reader().await?, &self.transfer).await?;

        let content_type = blob.resolved_content_type();
        let size = self
            .put_payload(&blob_client, &address, plan, &content_type, &blob.metadata)
            .await?;

        blob.content_type = Some(content_type);
        blob.blob_uri = Some(blob_uri(&blob_client)?);
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
        let blob_client = self.blob_client(blob)?;
        let address = blob.address();

        let mut stream = blob_client.get().into_stream();
        let mut attributes = None;
        let mut size = 0u64;

        while let Some(response) = stream.next().await {
            let response = match response {
                Ok(response) => response,
                // Ranged reads of a 0-byte blob fail with 416
                Err(e) if attributes.is_none() && is_empty_range(&e) => {
                    let properties = blob_client.get_properties().await.map_err(|e| {
                        classify_azure_error(&e, &format!("Failed to fetch properties for '{address}'"))
                    })?;
                    attributes = Some(properties.blob);
                    break;
                }
                Err(e) => {
                    return Err(classify_azure_error(&e, &format!("Failed to download '{address}'")))
                }
            };

            let mut body = response.data;
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| {
                    classify_azure_error(&e, &format!("Failed to read body of '{address}'"))
                })?;
                size += chunk.len() as u64;
                writer.write_all(&chunk).await?;
            }

            if attributes.is_none() {
                attributes = Some(response.blob);
            }
        }
        writer.flush().await?;

        if let Some(attributes) = attributes {
            blob.content_type = Some(attributes.properties.content_type);
            if fetch_metadata {
                blob.metadata = sdk_metadata_to_model(attributes.metadata);
            }
        }

        debug!("Downloaded {} ({})", address, format_size(size));
        Ok(())
    }

    async fn get_blob_metadata(&self, blob: &mut Blob) -> Result<()> {
        let blob_client = self.blob_client(blob)?;
        let address = blob.address();

        let properties = blob_client.get_properties().await.map_err(|e| {
            classify_azure_error(&e, &format!("Failed to fetch properties for '{address}'"))
        })?;

        blob.content_type = Some(properties.blob.properties.content_type.clone());
        blob.metadata = sdk_metadata_to_model(properties.blob.metadata.clone());

        debug!("Fetched {} metadata entries for {}", blob.metadata.len(), address);
        Ok(())
    }

    async fn change_blob(&self, original: &Blob, mut replacement: Blob) -> Result<bool> {
        let blob_client = self.blob_client(original)?;
        let address = original.address();

        // Open the replacement first so a bad source leaves the store untouched
        let plan = plan_upload(
            replacement.take_payload().into_reader().await?,
            &self.transfer,
        )
        .await?;

        let snapshot = blob_client.snapshot().await.map_err(|e| {
            classify_azure_error(&e, &format!("Failed to snapshot '{address}'"))
        })?;
        debug!(snapshot = ?snapshot.snapshot, "Created snapshot of {}", address);

        self.put_payload(
            &blob_client,
            &address,
            plan,
            &original.resolved_content_type(),
            &original.metadata,
        )
        .await?;

        info!("Overwrote {} after snapshot", address);
        Ok(true)
    }

    async fn get_delegated_access_token(
        &self,
        blob: &Blob,
        policy: &AccessPolicy,
    ) -> Result<AccessToken> {
        policy.validate()?;
        let blob_client = self.blob_client(blob)?;

        let now = Utc::now();
        let start = to_offset_datetime(now)?;
        let expiry = to_offset_datetime(expiry_after_hours(now, policy.expiry_hours))?;

        self.register_policy(&blob.container_name, policy, start, expiry)
            .await?;

        let signature = blob_client
            .shared_access_signature(to_sas_permissions(policy.permissions), expiry)
            .await
            .map_err(|e| {
                classify_azure_error(&e, &format!("Failed to sign access token for '{}'", blob.address()))
            })?;
        let signed_url = blob_client.generate_signed_blob_url(&signature)?;

        info!(
            "Issued delegated access token for {} under policy {}",
            blob.address(),
            policy.policy_name
        );
        Ok(AccessToken::new(signed_url.to_string()))
    }
}

#[async_trait]
impl BlobLease for AzureBlobStorageClient {
    async fn acquire_lease(&self, request: &LeaseRequest) -> Result<LeaseResponse> {
        let seconds = request.lease_seconds()?;
        let proposed = request.proposed_lease_id()?;
        let blob_client = self.blob_client(&request.blob)?;
        let address = request.blob.address();

        let mut builder = blob_client.acquire_lease(LeaseDuration::Seconds(seconds));
        if let Some(lease_id) = proposed {
            builder = builder.proposed_lease_id(ProposedLeaseId::from(LeaseId::from(lease_id)));
        }

        let response = builder.await.map_err(|e| {
            classify_azure_error(&e, &format!("Failed to acquire lease on '{address}'"))
        })?;

        let lease_id = response.lease_id.to_string();
        info!("Acquired {}s lease {} on {}", seconds, lease_id, address);
        Ok(LeaseResponse::acquired(lease_id))
    }
}

/// Helper function to create an Azure client from configuration
pub fn create_blob_client(config: &crate::config::Config) -> Result<AzureBlobStorageClient> {
    let account = config.storage.account_info()?;
    if let Some(endpoint) = config.storage.get_storage_endpoint() {
        debug!("Creating blob client for endpoint {}", endpoint);
    }
    AzureBlobStorageClient::with_transfer_options(account, config.storage.transfer.clone())
}

fn emulator_location(endpoint: &str) -> Result<CloudLocation> {
    let url = Url::parse(endpoint)?;
    let host = url.host_str().ok_or_else(|| {
        StowageError::config(format!("Invalid blob endpoint '{endpoint}': missing host"))
    })?;

    Ok(CloudLocation::Emulator {
        address: host.to_string(),
        port: url.port().unwrap_or(EMULATOR_DEFAULT_PORT),
    })
}

fn blob_source_path(payload: &BlobPayload) -> Option<std::path::PathBuf> {
    match payload {
        BlobPayload::File(path) => Some(path.clone()),
        _ => None,
    }
}

fn blob_uri(blob_client: &BlobClient) -> Result<BlobUri> {
    let primary = blob_client.url()?;
    Ok(BlobUri {
        primary_uri: primary.to_string(),
        secondary_uri: secondary_uri(&primary),
    })
}

/// Read-access replica address for public-cloud accounts
pub(crate) fn secondary_uri(primary: &Url) -> Option<String> {
    let host = primary.host_str()?;
    let (account, suffix) = host.split_once('.')?;
    if !suffix.starts_with("blob.core.") {
        return None;
    }

    let mut secondary = primary.clone();
    secondary
        .set_host(Some(&format!("{account}-secondary.{suffix}")))
        .ok()?;
    Some(secondary.to_string())
}

/// A 416 on the first ranged read means the blob has no content
fn is_empty_range(error: &azure_core::Error) -> bool {
    match error.kind() {
        ErrorKind::HttpResponse { status, error_code } => {
            *status == StatusCode::RequestedRangeNotSatisfiable
                || error_code.as_deref() == Some("InvalidRange")
        }
        _ => false,
    }
}

fn to_sdk_metadata(metadata: &BlobMetadata) -> Metadata {
    let mut sdk_metadata = Metadata::new();
    for (key, value) in metadata.iter() {
        sdk_metadata.insert(key.clone(), value.clone());
    }
    sdk_metadata
}

fn sdk_metadata_to_model(metadata: Option<HashMap<String, String>>) -> BlobMetadata {
    metadata.unwrap_or_default().into()
}

fn to_sas_permissions(permissions: Permission) -> BlobSasPermissions {
    BlobSasPermissions {
        read: permissions.contains(Permission::READ),
        write: permissions.contains(Permission::WRITE),
        delete: permissions.contains(Permission::DELETE),
        list: permissions.contains(Permission::LIST),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> StorageAccountInfo {
        StorageAccountInfo::new("demo", "a2V5")
    }

    #[test]
    fn test_client_creation() {
        let client = AzureBlobStorageClient::new(account()).unwrap();
        assert_eq!(client.account_name(), "demo");
        assert_eq!(client.transfer_options(), &TransferOptions::default());
    }

    #[test]
    fn test_client_creation_with_emulator_endpoint() {
        let account = account().with_endpoint("http://127.0.0.1:10000/devstoreaccount1");
        assert!(AzureBlobStorageClient::new(account).is_ok());
    }

    #[test]
    fn test_client_rejects_invalid_input() {
        assert!(AzureBlobStorageClient::new(StorageAccountInfo::new("", "a2V5")).is_err());
        assert!(AzureBlobStorageClient::new(StorageAccountInfo::new("demo", "")).is_err());

        let transfer = TransferOptions {
            block_size: 0,
            ..TransferOptions::default()
        };
        assert!(AzureBlobStorageClient::with_transfer_options(account(), transfer).is_err());
    }

    #[test]
    fn test_emulator_location() {
        match emulator_location("http://localhost:10001/devstoreaccount1").unwrap() {
            CloudLocation::Emulator { address, port } => {
                assert_eq!(address, "localhost");
                assert_eq!(port, 10001);
            }
            _ => panic!("expected emulator location"),
        }

        match emulator_location("http://azurite/devstoreaccount1").unwrap() {
            CloudLocation::Emulator { port, .. } => assert_eq!(port, EMULATOR_DEFAULT_PORT),
            _ => panic!("expected emulator location"),
        }

        assert!(emulator_location("not a url").is_err());
    }

    #[test]
    fn test_secondary_uri() {
        let primary = Url::parse("https://demo.blob.core.windows.net/reports/report.pdf").unwrap();
        assert_eq!(
            secondary_uri(&primary).as_deref(),
            Some("https://demo-secondary.blob.core.windows.net/reports/report.pdf")
        );

        let emulator = Url::parse("http://127.0.0.1:10000/devstoreaccount1/reports/a.txt").unwrap();
        assert_eq!(secondary_uri(&emulator), None);
    }

    #[test]
    fn test_empty_range_detection() {
        let empty = azure_core::Error::message(
            ErrorKind::HttpResponse {
                status: StatusCode::RequestedRangeNotSatisfiable,
                error_code: Some("InvalidRange".to_string()),
            },
            "The range specified is invalid for the current size of the resource.",
        );
        assert!(is_empty_range(&empty));

        let missing = azure_core::Error::message(
            ErrorKind::HttpResponse {
                status: StatusCode::NotFound,
                error_code: Some("BlobNotFound".to_string()),
            },
            "The specified blob does not exist.",
        );
        assert!(!is_empty_range(&missing));
        assert!(!is_empty_range(&azure_core::Error::message(ErrorKind::Io, "reset")));
    }

    #[tokio::test]
    async fn test_missing_replacement_fails_before_network() {
        let client = AzureBlobStorageClient::new(account()).unwrap();
        let original = Blob::new("demo", "report.pdf");
        let replacement =
            Blob::new("demo", "report.pdf").with_file("/nonexistent/stowage/replacement.pdf");
        let err = client.change_blob(&original, replacement).await.unwrap_err();
        assert!(matches!(err, StowageError::IoError(_)));
    }

    #[test]
    fn test_sas_permission_mapping() {
        let permissions = to_sas_permissions(Permission::READ | Permission::DELETE);
        assert!(permissions.read);
        assert!(permissions.delete);
        assert!(!permissions.write);
        assert!(!permissions.list);
    }

    #[test]
    fn test_metadata_conversion() {
        let mut fetched = HashMap::new();
        fetched.insert("source".to_string(), "scanner".to_string());

        let metadata = sdk_metadata_to_model(Some(fetched));
        assert_eq!(metadata.get("source"), Some("scanner"));
        assert!(sdk_metadata_to_model(None).is_empty());
    }

    #[test]
    fn test_create_blob_client_from_config() {
        let mut config = crate::config::Config::default();
        assert!(create_blob_client(&config).is_err());

        config.storage.account_name = "demo".to_string();
        config.storage.access_key = zeroize::Zeroizing::new("a2V5".to_string());
        let client = create_blob_client(&config).unwrap();
        assert_eq!(client.account_name(), "demo");
    }

    #[tokio::test]
    async fn test_invalid_address_fails_before_network() {
        let client = AzureBlobStorageClient::new(account()).unwrap();
        let err = client
            .upload_blob(Blob::new("Bad_Container", "a.txt").with_bytes(b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, StowageError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_invalid_lease_fails_before_network() {
        let client = AzureBlobStorageClient::new(account()).unwrap();
        let request = LeaseRequest::new(
            Blob::new("demo", "report.pdf"),
            5.0,
            crate::blob::models::LeaseUnit::Minutes,
        );
        let err = client.acquire_lease(&request).await.unwrap_err();
        assert!(matches!(err, StowageError::InvalidArgument(_)));
    }
}
