//! Update State Tracker
//!
//! Bookkeeping for the pending update (installed, not yet confirmed by the
//! host) and for the hashes known to fail, so a crashing update is never
//! retried in a loop. Malformed records never surface as errors.

use std::sync::Arc;

use super::error::Result;
use serde_json::Value;

use super::package::{FailedUpdate, Package, PendingUpdate};
use super::settings::KeyValueStore;

pub const PENDING_UPDATE_KEY: &str = "OTA_PENDING_UPDATE";
pub const FAILED_UPDATES_KEY: &str = "OTA_FAILED_UPDATES";

/// Tracks pending and failed updates in an injected key-value store
#[derive(Clone)]
pub struct UpdateStateTracker {
    store: Arc<dyn KeyValueStore>,
}

impl UpdateStateTracker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Record an installed update awaiting confirmation
    pub fn save_pending_update(&self, hash: &str, is_loading: bool) -> Result<()> {
        let pending = PendingUpdate {
            hash: hash.to_string(),
            is_loading,
        };
        let content = serde_json::to_string(&pending)?;
        self.store.set(PENDING_UPDATE_KEY, &content)
    }

    /// The pending update, if one is recorded and readable
    pub fn get_pending_update(&self) -> Option<PendingUpdate> {
        let content = self.store.get(PENDING_UPDATE_KEY)?;
        match serde_json::from_str(&content) {
            Ok(pending) => Some(pending),
            Err(e) => {
                tracing::warn!("Unable to parse pending update {:?}: {}", content, e);
                None
            }
        }
    }

    pub fn remove_pending_update(&self) -> Result<()> {
        self.store.remove(PENDING_UPDATE_KEY)
    }

    /// True if a pending update exists that is not currently loading and
    /// matches `hash`. `None` matches any pending update.
    pub fn is_pending_update(&self, hash: Option<&str>) -> bool {
        match self.get_pending_update() {
            Some(pending) => !pending.is_loading && hash.map_or(true, |h| h == pending.hash),
            None => false,
        }
    }

    /// Append a failed package unless its hash is already recorded
    pub fn save_failed_update(&self, package: &Package) -> Result<()> {
        let mut failed = self.get_failed_updates();
        if failed.iter().any(|p| p.package_hash == package.package_hash) {
            return Ok(());
        }

        tracing::info!("Recording failed update {}", package.package_hash);
        failed.push(FailedUpdate::from(package));
        let content = serde_json::to_string(&failed)?;
        self.store.set(FAILED_UPDATES_KEY, &content)
    }

    pub fn is_failed_hash(&self, hash: &str) -> bool {
        self.get_failed_updates()
            .iter()
            .any(|p| p.package_hash == hash)
    }

    /// Failed packages in the order they were recorded.
    ///
    /// Entries without a hash are skipped. A record that is not a JSON array
    /// is replaced with an empty list on this read.
    pub fn get_failed_updates(&self) -> Vec<FailedUpdate> {
        let Some(content) = self.store.get(FAILED_UPDATES_KEY) else {
            return Vec::new();
        };

        match serde_json::from_str::<Vec<Value>>(&content) {
            Ok(entries) => entries
                .into_iter()
                .filter_map(|entry| match serde_json::from_value(entry) {
                    Ok(failed) => Some(failed),
                    Err(e) => {
                        tracing::warn!("Skipping unreadable failed update entry: {}", e);
                        None
                    }
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Resetting corrupt failed updates record: {}", e);
                if let Err(e) = self.store.set(FAILED_UPDATES_KEY, "[]") {
                    tracing::warn!("Unable to reset failed updates record: {}", e);
                }
                Vec::new()
            }
        }
    }

    pub fn remove_failed_updates(&self) -> Result<()> {
        self.store.remove(FAILED_UPDATES_KEY)
    }
}
