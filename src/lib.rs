//! OTA Updater - client-side engine for over-the-air code bundle updates
//!
//! Downloads versioned bundles, verifies and unpacks them into a
//! hash-addressed package store, and keeps the current / previous / pending
//! pointers a host runtime uses to activate an update or roll it back.
//! Loading the bundle into a running process stays with the host: it asks
//! [`UpdateManager::on_app_start`] which bundle to run and reports success
//! through [`UpdateManager::notify_app_ready`]. When an update server is
//! configured, [`UpdateManager::check_for_updates`] asks it for a newer
//! version.

pub mod engine;

pub use engine::config::{ServerConfig, UpdaterConfig};
pub use engine::updater::{
    AvailableUpdate, CancelToken, DownloadProgress, LaunchOutcome, LaunchReport, Package,
    StatusRecord, UpdateCheck, UpdateDescriptor, UpdateError, UpdateManager, VersionChecker,
};
