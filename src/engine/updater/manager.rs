//! Update Manager
//!
//! The surface a host runtime calls into. Combines the package store with
//! the update state tracker and runs the launch lifecycle: an installed
//! update stays pending until the host reports it running, and an update
//! that never gets that far is rolled back on the next launch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::download::{CancelToken, DownloadProgress, Downloader, HttpTransport, Transport};
use super::error::{Result, UpdateError};
use super::package::{Package, StatusRecord, UpdateDescriptor};
use super::settings::{FileKeyValueStore, KeyValueStore};
use super::state::UpdateStateTracker;
use super::store::PackageStore;
use super::version_check::{
    AppVersion, AvailableUpdate, ReportStatus, StatusReport, UpdateCheck, UpdateType,
    VersionChecker,
};
use crate::engine::config::UpdaterConfig;

fn failed_update_error(hash: &str) -> UpdateError {
    UpdateError::InvalidUpdate(format!("Package {} previously failed to launch", hash))
}

/// What `on_app_start` decided
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchOutcome {
    /// No unconfirmed update
    Normal,
    /// First launch of a freshly installed update
    FirstRun { hash: String },
    /// The previous launch never confirmed its update
    RolledBack { failed_hash: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchReport {
    pub outcome: LaunchOutcome,
    /// Bundle to load, `None` means the bundle shipped with the app
    pub bundle_path: Option<PathBuf>,
}

pub struct UpdateManager {
    config: UpdaterConfig,
    store: PackageStore,
    tracker: UpdateStateTracker,
    checker: Option<VersionChecker>,
}

impl UpdateManager {
    /// Wire up a manager with an explicit transport and settings store
    pub fn new(
        config: UpdaterConfig,
        transport: Arc<dyn Transport>,
        settings: Arc<dyn KeyValueStore>,
    ) -> Self {
        let downloader = Downloader::new(transport).with_buffer_size(config.download_buffer_size);
        let store = PackageStore::new(
            config.package_root(),
            config.bundle_file_name.clone(),
            downloader,
        );
        Self {
            config,
            store,
            tracker: UpdateStateTracker::new(settings),
            checker: None,
        }
    }

    /// HTTP transport and file-backed settings, as configured. The update
    /// server client is set up when the configuration names a server.
    pub fn from_config(config: UpdaterConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.request_timeout())?);
        let settings = Arc::new(FileKeyValueStore::open(&config.settings_path()));
        let checker = config
            .server
            .as_ref()
            .map(|server| VersionChecker::new(server, transport.clone()))
            .transpose()?;

        let manager = Self::new(config, transport, settings);
        Ok(match checker {
            Some(checker) => manager.with_version_checker(checker),
            None => manager,
        })
    }

    pub fn with_version_checker(mut self, checker: VersionChecker) -> Self {
        self.checker = Some(checker);
        self
    }

    pub fn version_checker(&self) -> Option<&VersionChecker> {
        self.checker.as_ref()
    }

    pub fn configuration(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn store(&self) -> &PackageStore {
        &self.store
    }

    pub fn tracker(&self) -> &UpdateStateTracker {
        &self.tracker
    }

    // ========== Host surface ==========

    pub fn get_current_package_info(&self) -> StatusRecord {
        self.store.get_current_package_info()
    }

    pub fn get_current_package(&self) -> Option<Package> {
        self.store.get_current_package()
    }

    /// Download a package, refusing hashes that already failed on this device
    pub fn download_package<F>(
        &self,
        descriptor: &UpdateDescriptor,
        on_progress: F,
        cancel: &CancelToken,
    ) -> Result<Package>
    where
        F: FnMut(DownloadProgress),
    {
        if let Some(hash) = descriptor.package_hash.as_deref() {
            if self.tracker.is_failed_hash(hash) {
                return Err(failed_update_error(hash));
            }
        }

        let package = self.store.download_package(
            descriptor,
            &self.config.bundle_file_name,
            on_progress,
            cancel,
        )?;

        if descriptor.package_hash.is_none() && self.tracker.is_failed_hash(&package.package_hash) {
            tracing::warn!("Downloaded package {} matches a failed update", package.package_hash);
            self.store.remove_package(&package.package_hash)?;
            return Err(failed_update_error(&package.package_hash));
        }
        Ok(package)
    }

    /// Promote a package and mark it pending until the host confirms it.
    ///
    /// Packages that already failed to launch are refused.
    pub fn install_package(&self, package: &Package, remove_pending_update: bool) -> Result<()> {
        if self.store.get_current_package_hash().as_deref() == Some(package.package_hash.as_str()) {
            return Ok(());
        }
        if self.tracker.is_failed_hash(&package.package_hash) {
            return Err(failed_update_error(&package.package_hash));
        }

        self.store.install_package(package, remove_pending_update)?;
        self.tracker.save_pending_update(&package.package_hash, false)
    }

    /// Install the package owning `bundle_path`
    pub fn install_bundle_path(&self, bundle_path: &Path) -> Result<()> {
        let hash = self.store.package_hash_for_path(bundle_path).ok_or_else(|| {
            UpdateError::InvalidUpdate(format!("Invalid bundle path: {}", bundle_path.display()))
        })?;
        let package = self.store.get_package(&hash).ok_or_else(|| {
            UpdateError::InvalidUpdate(format!("Package not found for hash: {}", hash))
        })?;
        self.install_package(&package, false)
    }

    /// Factory reset: every package plus the pending and failed records
    pub fn clear_updates(&self) -> Result<()> {
        self.store.clear_updates()?;
        self.tracker.remove_pending_update()?;
        self.tracker.remove_failed_updates()
    }

    pub fn resolve_bundle_path(&self, hash: &str) -> Option<PathBuf> {
        self.store.resolve_bundle_path(hash)
    }

    pub fn get_current_bundle_path(&self) -> Option<PathBuf> {
        self.store.get_current_bundle_path()
    }

    pub fn is_pending_update(&self, hash: Option<&str>) -> bool {
        self.tracker.is_pending_update(hash)
    }

    pub fn is_failed_hash(&self, hash: &str) -> bool {
        self.tracker.is_failed_hash(hash)
    }

    // ========== Update server ==========

    fn require_checker(&self) -> Result<&VersionChecker> {
        self.checker
            .as_ref()
            .ok_or_else(|| UpdateError::NotConfigured("no update server configured".to_string()))
    }

    pub fn current_app_version(&self) -> AppVersion {
        AppVersion::from_config(&self.config)
    }

    /// Ask the update server for a newer version
    pub fn check_for_updates(&self) -> Result<UpdateCheck> {
        self.require_checker()?
            .check_for_updates(&self.current_app_version())
    }

    /// Download the bundle of a minor update, optionally installing it, and
    /// report progress to the server.
    ///
    /// Major updates ship as an app binary and are refused.
    pub fn apply_update<F>(
        &self,
        update: &AvailableUpdate,
        install: bool,
        on_progress: F,
        cancel: &CancelToken,
    ) -> Result<Package>
    where
        F: FnMut(DownloadProgress),
    {
        let checker = self.require_checker()?;
        let current = self.current_app_version();
        let update_type = update.effective_update_type(&current);
        if update_type == UpdateType::Major {
            return Err(UpdateError::InvalidUpdate(format!(
                "Update {} is a major update and requires a new app binary",
                update.version_name
            )));
        }

        let report = |status, error_message| StatusReport {
            status,
            from_version: current.version_name.clone(),
            to_version: update.version_name.clone(),
            update_type,
            error_message,
        };

        checker.report_update_status(&report(ReportStatus::Downloading, None));
        let result = update.to_descriptor().and_then(|descriptor| {
            let package = self.download_package(&descriptor, on_progress, cancel)?;
            if install {
                self.install_package(&package, false)?;
            }
            Ok(package)
        });

        match &result {
            Ok(_) => checker.report_update_status(&report(ReportStatus::Completed, None)),
            Err(e) => checker.report_update_status(&report(ReportStatus::Failed, Some(e.to_string()))),
        };
        result
    }

    // ========== Launch lifecycle ==========

    /// Decide which bundle this launch should run.
    ///
    /// Call once per process start, before loading any bundle.
    pub fn on_app_start(&self) -> Result<LaunchReport> {
        let outcome = match self.tracker.get_pending_update() {
            Some(pending) if pending.is_loading => {
                tracing::warn!("Update {} did not confirm its launch, rolling back", pending.hash);
                self.rollback()?;
                LaunchOutcome::RolledBack {
                    failed_hash: pending.hash,
                }
            }
            Some(pending) => {
                tracing::info!("First launch of update {}", pending.hash);
                self.tracker.save_pending_update(&pending.hash, true)?;
                LaunchOutcome::FirstRun { hash: pending.hash }
            }
            None => LaunchOutcome::Normal,
        };

        Ok(LaunchReport {
            outcome,
            bundle_path: self.store.get_current_bundle_path(),
        })
    }

    /// The running bundle works; keep it
    pub fn notify_app_ready(&self) -> Result<()> {
        if let Some(pending) = self.tracker.get_pending_update() {
            tracing::info!("Update {} confirmed", pending.hash);
            self.tracker.remove_pending_update()?;
        }
        Ok(())
    }

    /// Abandon the current package for the previous one.
    ///
    /// The current package is recorded as failed. Without a previous package
    /// the store is cleared and the host falls back to its shipped bundle.
    pub fn rollback(&self) -> Result<Option<Package>> {
        if let Some(current) = self.store.get_current_package() {
            self.tracker.save_failed_update(&current)?;
        }

        let restored = match self.store.get_previous_package() {
            Some(previous) => {
                tracing::info!("Rolling back to package {}", previous.package_hash);
                self.store.install_package(&previous, true)?;
                Some(previous)
            }
            None => {
                tracing::info!("No previous package, reverting to the shipped bundle");
                self.store.clear_updates()?;
                None
            }
        };

        self.tracker.remove_pending_update()?;
        Ok(restored)
    }
}
