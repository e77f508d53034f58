//! Update Server Client
//!
//! Asks the update server whether a newer version exists and reports how an
//! update went. Reporting is best effort: failures are logged and never
//! returned to the caller.

use std::fmt;
use std::sync::Arc;

use reqwest::blocking::RequestBuilder;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::download::HttpTransport;
use super::error::{Result, UpdateError};
use super::package::UpdateDescriptor;
use crate::engine::config::{ServerConfig, UpdaterConfig};

pub const CHECK_PATH: &str = "updates/check";
pub const REPORT_PATH: &str = "updates/report";
pub const APP_ID_HEADER: &str = "X-App-Id";
pub const API_KEY_HEADER: &str = "X-API-Key";

const UNKNOWN_DEVICE_ID: &str = "unknown";
const FALLBACK_VERSION_NAME: &str = "1.0.0";
const FALLBACK_VERSION_CODE: u64 = 1;

pub type Headers = [(&'static str, String)];

/// JSON request channel to the update server
pub trait ServerTransport: Send + Sync {
    fn get_json(&self, url: &Url, headers: &Headers) -> Result<Value>;
    fn post_json(&self, url: &Url, headers: &Headers, body: &Value) -> Result<Value>;
}

impl ServerTransport for HttpTransport {
    fn get_json(&self, url: &Url, headers: &Headers) -> Result<Value> {
        send_json(with_headers(self.client.get(url.clone()), headers))
    }

    fn post_json(&self, url: &Url, headers: &Headers, body: &Value) -> Result<Value> {
        let request = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(body)?);
        send_json(with_headers(request, headers))
    }
}

fn with_headers(mut request: RequestBuilder, headers: &Headers) -> RequestBuilder {
    for (name, value) in headers {
        request = request.header(*name, value.as_str());
    }
    request
}

fn send_json(request: RequestBuilder) -> Result<Value> {
    let response = request.header(ACCEPT, "application/json").send()?;
    let status = response.status();
    let body = response.text()?;

    if !status.is_success() {
        return Err(UpdateError::Network(format!("HTTP {}: {}", status, body.trim())));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body)?)
}

/// Leading numeric components of a version name.
///
/// A `v` prefix is ignored and anything that is not a number counts as 0,
/// so `v2.1.0-beta` parses as `(2, 1, 0)`.
pub fn parse_version_name(name: &str) -> (u64, u64, u64) {
    let trimmed = name.trim();
    let cleaned = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    let mut parts = cleaned.split('.').map(|part| {
        let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().unwrap_or(0)
    });
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

/// Kind of update, as reported to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    /// New native build; ships as an app binary, not a bundle
    Major,
    /// Bundle-only update
    Minor,
}

impl UpdateType {
    /// Major when the leading version number grows, minor otherwise
    pub fn classify(current_version: &str, new_version: &str) -> Self {
        if parse_version_name(new_version).0 > parse_version_name(current_version).0 {
            Self::Major
        } else {
            Self::Minor
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Major => write!(f, "major"),
            Self::Minor => write!(f, "minor"),
        }
    }
}

/// Installed app version sent with every check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppVersion {
    pub version_name: String,
    pub version_code: u64,
}

impl AppVersion {
    pub fn new(version_name: impl Into<String>, version_code: u64) -> Self {
        Self {
            version_name: version_name.into(),
            version_code,
        }
    }

    /// Version from the configuration, `1.0.0` / `1` for whatever is not set
    pub fn from_config(config: &UpdaterConfig) -> Self {
        if config.app_version.is_none() || config.app_version_code.is_none() {
            tracing::warn!("App version not fully configured, using defaults for missing parts");
        }
        Self::new(
            config
                .app_version
                .clone()
                .unwrap_or_else(|| FALLBACK_VERSION_NAME.to_string()),
            config.app_version_code.unwrap_or(FALLBACK_VERSION_CODE),
        )
    }
}

/// Newer version offered by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableUpdate {
    pub version_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_code: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_type: Option<UpdateType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
    /// App binary download, for major updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Bundle download, for minor updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apk_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_size: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AvailableUpdate {
    /// The server's classification, or one derived from the version names
    pub fn effective_update_type(&self, current: &AppVersion) -> UpdateType {
        self.update_type
            .unwrap_or_else(|| UpdateType::classify(&current.version_name, &self.version_name))
    }

    /// Descriptor for downloading the bundle of this update
    pub fn to_descriptor(&self) -> Result<UpdateDescriptor> {
        let bundle_url = self.bundle_url.as_deref().ok_or_else(|| {
            UpdateError::MalformedDescriptor(format!(
                "Update {} has no bundle URL",
                self.version_name
            ))
        })?;

        let mut descriptor = UpdateDescriptor::new(bundle_url, self.version_name.clone());
        descriptor.package_hash = self
            .extra
            .get("packageHash")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(code) = self.version_code {
            descriptor.extra.insert("versionCode".to_string(), Value::from(code));
        }
        if let Some(update_type) = self.update_type {
            descriptor
                .extra
                .insert("updateType".to_string(), Value::from(update_type.to_string()));
        }
        if let Some(notes) = &self.release_notes {
            descriptor
                .extra
                .insert("releaseNotes".to_string(), Value::from(notes.clone()));
        }
        Ok(descriptor)
    }
}

/// Response of `updates/check`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheck {
    pub update_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<AvailableUpdate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Downloading,
    Completed,
    Failed,
}

/// Body of `updates/report`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: ReportStatus,
    pub from_version: String,
    pub to_version: String,
    pub update_type: UpdateType,
    pub error_message: Option<String>,
}

/// Client for the update server's check and report endpoints
#[derive(Clone)]
pub struct VersionChecker {
    api_url: Url,
    app_id: String,
    api_key: Option<String>,
    device_id: String,
    transport: Arc<dyn ServerTransport>,
}

impl VersionChecker {
    pub fn new(config: &ServerConfig, transport: Arc<dyn ServerTransport>) -> Result<Self> {
        let mut api_url = Url::parse(config.api_url.trim()).map_err(|e| {
            UpdateError::MalformedDescriptor(format!("Invalid API URL {}: {}", config.api_url, e))
        })?;
        // Relative joins replace the last segment unless the path ends in '/'
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }

        Ok(Self {
            api_url,
            app_id: config.app_id.clone(),
            api_key: config.api_key.clone(),
            device_id: config
                .device_id
                .clone()
                .unwrap_or_else(|| UNKNOWN_DEVICE_ID.to_string()),
            transport,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_url
            .join(path)
            .map_err(|e| UpdateError::MalformedDescriptor(format!("Invalid endpoint {}: {}", path, e)))
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![(APP_ID_HEADER, self.app_id.clone())];
        if let Some(key) = &self.api_key {
            headers.push((API_KEY_HEADER, key.clone()));
        }
        headers
    }

    /// Ask the server for a version newer than `current`
    pub fn check_for_updates(&self, current: &AppVersion) -> Result<UpdateCheck> {
        let mut url = self.endpoint(CHECK_PATH)?;
        url.query_pairs_mut()
            .append_pair("currentVersion", &current.version_name)
            .append_pair("currentVersionCode", &current.version_code.to_string())
            .append_pair("appId", &self.app_id)
            .append_pair("deviceId", &self.device_id);

        tracing::info!(
            "Checking for updates from {} ({})",
            current.version_name,
            current.version_code
        );
        let response = self.transport.get_json(&url, &self.headers())?;
        let check: UpdateCheck = serde_json::from_value(response)
            .map_err(|e| UpdateError::MalformedDescriptor(format!("Unexpected check response: {}", e)))?;

        match &check.update {
            Some(update) if check.update_available => {
                tracing::info!("Update available: {}", update.version_name);
            }
            None if check.update_available => {
                return Err(UpdateError::MalformedDescriptor(
                    "Server reported an update without describing it".to_string(),
                ));
            }
            _ => tracing::info!("App is up to date"),
        }
        Ok(check)
    }

    /// Send a status report. Returns whether the server accepted it.
    pub fn report_update_status(&self, report: &StatusReport) -> bool {
        let result = self.endpoint(REPORT_PATH).and_then(|mut url| {
            url.query_pairs_mut().append_pair("deviceId", &self.device_id);
            let body = serde_json::to_value(report)?;
            self.transport.post_json(&url, &self.headers(), &body)
        });

        match result {
            Ok(_) => {
                tracing::debug!("Reported {:?} for {}", report.status, report.to_version);
                true
            }
            Err(e) => {
                tracing::warn!("Unable to report update status: {}", e);
                false
            }
        }
    }
}
