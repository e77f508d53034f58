//! OTA Updater CLI Module
//! Command-line interface for inspecting and driving a package store

pub mod formatter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::config::{ConfigError, UpdaterConfig};

#[derive(Parser, Debug)]
#[command(name = "ota-cli")]
#[command(author = "OTA Updater Team")]
#[command(version)]
#[command(about = "Manage over-the-air bundle updates", long_about = None)]
pub struct Cli {
    /// Base directory holding the package store (defaults to the platform data dir)
    #[arg(short, long, global = true)]
    pub base_dir: Option<PathBuf>,

    /// Config file (ota-updater.json); overrides --base-dir when given
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show current / previous / pending state
    Status,

    /// Download a package into the store
    Download {
        /// Payload URL (ZIP archive or raw bundle)
        url: String,

        /// Version name recorded in the package metadata
        #[arg(short, long)]
        version_name: Option<String>,

        /// Package hash; derived from the payload digest when omitted
        #[arg(long)]
        hash: Option<String>,

        /// Bundle file name to look for (defaults to the configured name)
        #[arg(long)]
        bundle_name: Option<String>,

        /// Promote the package right after downloading
        #[arg(long)]
        install: bool,
    },

    /// Ask the update server for a newer version
    Check {
        /// Download the offered bundle
        #[arg(short, long)]
        download: bool,

        /// Download and promote the offered bundle
        #[arg(long)]
        install: bool,
    },

    /// Promote a downloaded package to current
    Install {
        /// Package hash
        hash: String,
    },

    /// Roll back to the previous package
    Rollback,

    /// Confirm the current update is running
    Ready,

    /// Delete every package and update record
    Clear,

    /// Failed update records
    Failed {
        #[command(subcommand)]
        action: FailedAction,
    },

    /// Print the bundle path of a package (current when omitted)
    Path {
        /// Package hash
        hash: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum FailedAction {
    /// List packages that failed to launch
    List,

    /// Forget all failed packages
    Clear,
}

impl Cli {
    /// Resolve the updater configuration from the global flags
    pub fn load_config(&self) -> Result<UpdaterConfig, ConfigError> {
        if let Some(path) = &self.config {
            return UpdaterConfig::load(path);
        }
        let base_dir = match &self.base_dir {
            Some(dir) => dir.clone(),
            None => UpdaterConfig::default_base_dir()?,
        };
        Ok(UpdaterConfig::for_base_dir(base_dir))
    }
}
