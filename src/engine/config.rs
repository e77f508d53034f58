//! Updater Configuration Module
//! Handles loading and validating ota-updater.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::updater::download::DOWNLOAD_BUFFER_SIZE;

pub const CONFIG_FILE_NAME: &str = "ota-updater.json";
pub const PACKAGE_ROOT_NAME: &str = "OTAUpdates";
pub const SETTINGS_FILE_NAME: &str = "OTAUpdater.settings.json";
pub const DEFAULT_BUNDLE_FILE_NAME: &str = "index.android.bundle";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Could not determine a data directory")]
    NoDataDir,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdaterConfig {
    /// Directory holding the package root and the settings store
    pub base_dir: PathBuf,
    #[serde(default = "default_bundle_file_name")]
    pub bundle_file_name: String,
    #[serde(default = "default_buffer_size")]
    pub download_buffer_size: usize,
    /// `null` disables the request timeout
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version_code: Option<u64>,
    /// Update server to check against; checking is unavailable without it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,
}

/// Update server endpoint and credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Base URL; `updates/check` and `updates/report` are resolved against it
    pub api_url: String,
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

fn default_bundle_file_name() -> String {
    DEFAULT_BUNDLE_FILE_NAME.to_string()
}

fn default_buffer_size() -> usize {
    DOWNLOAD_BUFFER_SIZE
}

fn default_timeout_secs() -> Option<u64> {
    Some(300)
}

impl UpdaterConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: UpdaterConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn for_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            bundle_file_name: default_bundle_file_name(),
            download_buffer_size: default_buffer_size(),
            request_timeout_secs: default_timeout_secs(),
            app_version: None,
            app_version_code: None,
            server: None,
        }
    }

    /// Platform data directory
    ///
    /// Linux: ~/.local/share/ota-updater/
    /// Windows: %LOCALAPPDATA%\ota-updater\
    pub fn default_base_dir() -> Result<PathBuf, ConfigError> {
        let data_dir = dirs::data_local_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(data_dir.join("ota-updater"))
    }

    pub fn package_root(&self) -> PathBuf {
        self.base_dir.join(PACKAGE_ROOT_NAME)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.base_dir.join(SETTINGS_FILE_NAME)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}
