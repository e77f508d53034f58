// OTA Updater Engine - Core module structure
pub mod config;
pub mod cli;
pub mod updater;

pub use config::UpdaterConfig;
pub use updater::UpdateManager;
