//! TOML configuration.
//!
//! ```toml
//! [storage]
//! kv_path = "./data/kv.sqlite"
//! text_path = "./data/texts.sqlite"
//! app_prefix = "compliance"
//!
//! [drive]
//! client_id = "1234.apps.googleusercontent.com"
//! app_folder_name = "Compliance Assessments"
//!
//! [sync]
//! debounce_secs = 30
//!
//! [shared_repository]          # optional
//! folder_id = "0AbCdEf"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use project_sync_core::models::SharedRepositoryConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub shared_repository: Option<SharedRepositoryConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub kv_path: PathBuf,
    pub text_path: PathBuf,
    #[serde(default = "default_app_prefix")]
    pub app_prefix: String,
}

fn default_app_prefix() -> String {
    "compliance".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DriveConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_upload_base")]
    pub upload_base: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_app_folder_name")]
    pub app_folder_name: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            api_base: default_api_base(),
            upload_base: default_upload_base(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            app_folder_name: default_app_folder_name(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}
fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}
fn default_api_base() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}
fn default_upload_base() -> String {
    "https://www.googleapis.com/upload/drive/v3".to_string()
}
fn default_redirect_uri() -> String {
    "http://localhost".to_string()
}
fn default_scopes() -> Vec<String> {
    vec![
        "https://www.googleapis.com/auth/drive.file".to_string(),
        "https://www.googleapis.com/auth/drive.readonly".to_string(),
    ]
}
fn default_app_folder_name() -> String {
    "Compliance Assessments".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_secs: default_debounce_secs(),
        }
    }
}

fn default_debounce_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.storage.kv_path == config.storage.text_path {
        anyhow::bail!("storage.kv_path and storage.text_path must be different files");
    }

    if config.storage.app_prefix.is_empty() || config.storage.app_prefix.contains('-') {
        anyhow::bail!("storage.app_prefix must be non-empty and must not contain '-'");
    }

    if config.drive.app_folder_name.trim().is_empty() {
        anyhow::bail!("drive.app_folder_name must not be empty");
    }

    if config.drive.timeout_secs == 0 {
        anyhow::bail!("drive.timeout_secs must be > 0");
    }

    if config.sync.debounce_secs == 0 {
        anyhow::bail!("sync.debounce_secs must be > 0");
    }

    if let Some(shared) = &config.shared_repository {
        if shared.folder_id.trim().is_empty() {
            anyhow::bail!("shared_repository.folder_id must not be empty");
        }
    }

    Ok(config)
}
