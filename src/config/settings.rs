//! Configuration settings management
//!
//! This module handles loading configuration from multiple sources,
//! validation, and persistence.

use crate::blob::models::{StorageAccountInfo, TransferOptions};
use crate::error::{Result, StowageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;
use zeroize::Zeroizing;

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub account_name: String,
    pub access_key: Zeroizing<String>,
    /// Blob endpoint override for an emulator such as Azurite
    pub endpoint: Option<String>,
    pub transfer: TransferOptions,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("account_name", &self.account_name)
            .field("access_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("transfer", &self.transfer)
            .finish()
    }
}

impl StorageConfig {
    /// Build the account credentials this section describes
    pub fn account_info(&self) -> Result<StorageAccountInfo> {
        let mut info = StorageAccountInfo::new(self.account_name.clone(), self.access_key.as_str());
        info.endpoint = self.endpoint.clone();
        info.validate()?;
        Ok(info)
    }

    /// Get blob service endpoint URL
    pub fn get_storage_endpoint(&self) -> Option<String> {
        self.endpoint.clone().or_else(|| {
            if !self.account_name.is_empty() {
                Some(format!("https://{}.blob.core.windows.net", self.account_name))
            } else {
                None
            }
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub debug: bool,
    pub storage: StorageConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.account_name.trim().is_empty() {
            return Err(StowageError::config("Storage account name is required"));
        }

        if self.storage.access_key.trim().is_empty() {
            return Err(StowageError::config("Storage access key is required"));
        }

        self.storage.transfer.validate()
    }

    pub fn get_config_path() -> Result<PathBuf> {
        // Use XDG Base Directory specification on Linux and macOS
        // On Windows, use the platform-appropriate config directory
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        {
            use std::env;
            let config_dir = if let Ok(xdg_config_home) = env::var("XDG_CONFIG_HOME") {
                PathBuf::from(xdg_config_home)
            } else {
                let home_dir = env::var("HOME")
                    .map_err(|_| StowageError::config("HOME environment variable not set"))?;
                PathBuf::from(home_dir).join(".config")
            };
            Ok(config_dir.join("stowage").join("stowage.toml"))
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            let config_dir = dirs::config_dir()
                .ok_or_else(|| StowageError::config("Unable to determine config directory"))?;
            Ok(config_dir.join("stowage").join("stowage.toml"))
        }
    }
}

/// Load configuration from multiple sources with priority order:
/// 1. Environment variables
/// 2. Configuration file
/// 3. Default values
pub async fn load_config() -> Result<Config> {
    let config = load_config_no_validation().await?;

    // Validate configuration
    config.validate()?;

    Ok(config)
}

/// Load configuration without validation
pub async fn load_config_no_validation() -> Result<Config> {
    let mut config = Config::default();

    // Load from configuration file if it exists
    let config_path = Config::get_config_path()?;
    if config_path.exists() {
        config = load_from_file(&config_path).await?;
        debug!("Loaded configuration from {}", config_path.display());
    }

    // Override with environment variables
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    Ok(config)
}

async fn load_from_file(path: &Path) -> Result<Config> {
    let contents = tokio::fs::read_to_string(path).await?;

    // Try to parse as TOML first, then JSON as fallback
    if let Ok(config) = toml::from_str::<Config>(&contents) {
        return Ok(config);
    }

    let config = serde_json::from_str::<Config>(&contents)?;
    Ok(config)
}

/// Apply environment overrides; `lookup` resolves a variable name to its value
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("DEBUG") {
        config.debug = value.to_lowercase() == "true" || value == "1";
    }

    // Connection string first so the individual variables can refine it
    if let Some(value) = lookup("AZURE_STORAGE_CONNECTION_STRING") {
        let info = StorageAccountInfo::from_connection_string(&value)?;
        config.storage.account_name = info.storage_account_name.clone();
        config.storage.access_key = info.access_key.clone();
        if info.endpoint.is_some() {
            config.storage.endpoint = info.endpoint.clone();
        }
    }

    if let Some(value) = lookup("AZURE_STORAGE_ACCOUNT") {
        config.storage.account_name = value;
    }

    if let Some(value) = lookup("AZURE_STORAGE_KEY") {
        config.storage.access_key = Zeroizing::new(value);
    }

    if let Some(value) = lookup("AZURE_STORAGE_ENDPOINT") {
        config.storage.endpoint = Some(value);
    }

    let transfer = &mut config.storage.transfer;

    if let Some(value) = lookup("BLOB_SINGLE_UPLOAD_THRESHOLD") {
        if let Ok(threshold) = value.parse::<u64>() {
            transfer.single_upload_threshold = threshold;
        }
    }

    if let Some(value) = lookup("BLOB_BLOCK_SIZE") {
        if let Ok(block_size) = value.parse::<usize>() {
            transfer.block_size = block_size;
        }
    }

    if let Some(value) = lookup("BLOB_MAX_CONCURRENCY") {
        if let Ok(max_concurrency) = value.parse::<usize>() {
            transfer.max_concurrency = max_concurrency;
        }
    }

    Ok(())
}

pub async fn save_config(config: &Config) -> Result<()> {
    let config_path = Config::get_config_path()?;
    save_to_file(config, &config_path).await
}

async fn save_to_file(config: &Config, path: &Path) -> Result<()> {
    // Create parent directories if they don't exist
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // Serialize to TOML format
    let contents = toml::to_string_pretty(config)
        .map_err(|e| StowageError::serialization(e.to_string()))?;

    tokio::fs::write(path, contents).await?;
    debug!("Saved configuration to {}", path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config_fails_validation() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(StowageError::ConfigError(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            lookup_from(&[
                ("DEBUG", "1"),
                ("AZURE_STORAGE_ACCOUNT", "demo"),
                ("AZURE_STORAGE_KEY", "a2V5"),
                ("BLOB_BLOCK_SIZE", "4194304"),
                ("BLOB_MAX_CONCURRENCY", "not-a-number"),
            ]),
        )
        .unwrap();

        assert!(config.debug);
        assert_eq!(config.storage.account_name, "demo");
        assert_eq!(config.storage.access_key.as_str(), "a2V5");
        assert_eq!(config.storage.transfer.block_size, 4 * 1024 * 1024);
        // Unparseable values keep the previous setting
        assert_eq!(config.storage.transfer.max_concurrency, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_connection_string_override() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            lookup_from(&[
                (
                    "AZURE_STORAGE_CONNECTION_STRING",
                    "AccountName=devstoreaccount1;AccountKey=a2V5;BlobEndpoint=http://127.0.0.1:10000/devstoreaccount1",
                ),
                ("AZURE_STORAGE_ACCOUNT", "override"),
            ]),
        )
        .unwrap();

        assert_eq!(config.storage.account_name, "override");
        assert_eq!(
            config.storage.get_storage_endpoint().as_deref(),
            Some("http://127.0.0.1:10000/devstoreaccount1")
        );

        let info = config.storage.account_info().unwrap();
        assert_eq!(info.storage_account_name, "override");
        assert_eq!(info.access_key.as_str(), "a2V5");
    }

    #[test]
    fn test_invalid_connection_string_is_rejected() {
        let mut config = Config::default();
        let result = apply_env_overrides(
            &mut config,
            lookup_from(&[("AZURE_STORAGE_CONNECTION_STRING", "AccountName=demo")]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_default_endpoint() {
        let mut config = Config::default();
        assert_eq!(config.storage.get_storage_endpoint(), None);

        config.storage.account_name = "demo".to_string();
        assert_eq!(
            config.storage.get_storage_endpoint().as_deref(),
            Some("https://demo.blob.core.windows.net")
        );
    }

    #[test]
    fn test_debug_redacts_access_key() {
        let mut config = Config::default();
        config.storage.access_key = Zeroizing::new("c2VjcmV0".to_string());
        assert!(!format!("{:?}", config).contains("c2VjcmV0"));
    }

    #[tokio::test]
    async fn test_save_and_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stowage.toml");

        let mut config = Config::default();
        config.storage.account_name = "demo".to_string();
        config.storage.access_key = Zeroizing::new("a2V5".to_string());
        config.storage.transfer.max_concurrency = 8;

        save_to_file(&config, &path).await.unwrap();
        let loaded = load_from_file(&path).await.unwrap();

        assert_eq!(loaded.storage.account_name, "demo");
        assert_eq!(loaded.storage.access_key.as_str(), "a2V5");
        assert_eq!(loaded.storage.transfer.max_concurrency, 8);
        assert_eq!(loaded.storage.transfer.block_size, 1024 * 1024);
    }

    #[tokio::test]
    async fn test_load_json_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stowage.conf");
        tokio::fs::write(
            &path,
            r#"{"debug": true, "storage": {"account_name": "demo", "access_key": "a2V5"}}"#,
        )
        .await
        .unwrap();

        let loaded = load_from_file(&path).await.unwrap();
        assert!(loaded.debug);
        assert_eq!(loaded.storage.account_name, "demo");
        assert_eq!(loaded.storage.transfer, TransferOptions::default());
    }

    #[tokio::test]
    async fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stowage.toml");
        tokio::fs::write(&path, "debug = [").await.unwrap();

        assert!(matches!(
            load_from_file(&path).await,
            Err(StowageError::JsonError(_))
        ));
    }
}
