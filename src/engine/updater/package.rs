//! Update Data Model
//!
//! JSON documents exchanged with the update server and persisted on disk.
//! Every document keeps unrecognized keys in `extra` so a read-modify-write
//! cycle never drops fields this crate does not know about.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{Result, UpdateError};

/// Key of the relative bundle path inside package metadata
pub const BUNDLE_PATH_KEY: &str = "bundlePath";

/// Update descriptor as delivered by the update server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_hash: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UpdateDescriptor {
    /// Build a descriptor from a download URL and version name
    pub fn new(download_url: impl Into<String>, version_name: impl Into<String>) -> Self {
        Self {
            download_url: Some(download_url.into()),
            version_name: Some(version_name.into()),
            ..Self::default()
        }
    }

    /// Parse a descriptor from a JSON value
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| UpdateError::MalformedDescriptor(e.to_string()))
    }

    /// The download URL, which every descriptor must carry
    pub fn require_download_url(&self) -> Result<&str> {
        match self.download_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(url),
            _ => Err(UpdateError::MalformedDescriptor(
                "Download URL is missing from update descriptor".to_string(),
            )),
        }
    }
}

/// A downloaded package, identified by its hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub package_hash: String,
    pub download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,
    /// `/`-joined path of the bundle relative to the package folder
    #[serde(default, rename = "bundlePath", skip_serializing_if = "Option::is_none")]
    pub relative_bundle_path: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Package {
    /// Build package metadata from the descriptor it was downloaded from
    pub fn from_descriptor(
        descriptor: &UpdateDescriptor,
        package_hash: String,
        relative_bundle_path: Option<String>,
    ) -> Result<Self> {
        let download_url = descriptor.require_download_url()?.to_string();

        let mut extra = descriptor.extra.clone();
        // A stale bundle path from a previous install must not shadow the new one
        extra.remove(BUNDLE_PATH_KEY);

        Ok(Self {
            package_hash,
            download_url,
            version_name: descriptor.version_name.clone(),
            relative_bundle_path,
            extra,
        })
    }

    /// Parse package metadata from a JSON value
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| UpdateError::MalformedDescriptor(e.to_string()))
    }

    /// Serialize for handing to the host runtime
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Entry of the failed updates record.
///
/// Only the hash is required, so records written by other producers survive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedUpdate {
    pub package_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<&Package> for FailedUpdate {
    fn from(package: &Package) -> Self {
        let mut extra = package.extra.clone();
        extra.insert("downloadUrl".to_string(), Value::from(package.download_url.clone()));
        if let Some(path) = &package.relative_bundle_path {
            extra.insert(BUNDLE_PATH_KEY.to_string(), Value::from(path.clone()));
        }
        Self {
            package_hash: package.package_hash.clone(),
            version_name: package.version_name.clone(),
            extra,
        }
    }
}

/// Current / previous package pointers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    #[serde(default)]
    pub current_package: Option<String>,
    #[serde(default)]
    pub previous_package: Option<String>,
}

impl StatusRecord {
    pub fn is_empty(&self) -> bool {
        self.current_package.is_none() && self.previous_package.is_none()
    }
}

/// Installed update awaiting confirmation from the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdate {
    pub hash: String,
    pub is_loading: bool,
}
