//! Over-the-air bundle updater
//!
//! Components:
//! - `download` - Payload streaming, byte accounting and type sniffing
//! - `extract` - Archive extraction and bundle discovery
//! - `store` - On-disk package layout and current/previous pointers
//! - `state` - Pending and failed update bookkeeping
//! - `version_check` - Update server check and status reports
//! - `manager` - Host-facing surface and launch lifecycle

pub mod error;
pub mod package;
pub mod settings;
pub mod digest;
pub mod download;
pub mod extract;
pub mod store;
pub mod state;
pub mod version_check;
pub mod manager;

pub use download::{CancelToken, DownloadProgress, Downloader, HttpTransport, Payload, PayloadKind, Transport};
pub use error::{Result, UpdateError};
pub use manager::{LaunchOutcome, LaunchReport, UpdateManager};
pub use package::{FailedUpdate, Package, PendingUpdate, StatusRecord, UpdateDescriptor};
pub use settings::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use state::UpdateStateTracker;
pub use store::PackageStore;
pub use version_check::{
    AppVersion, AvailableUpdate, ReportStatus, ServerTransport, StatusReport, UpdateCheck,
    UpdateType, VersionChecker,
};
