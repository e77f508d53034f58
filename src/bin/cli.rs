//! OTA Updater CLI - Main entry point for CLI binary
//!
//! This binary provides the `ota-cli` tool for inspecting and driving a
//! package store from a shell.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ota_updater::engine::cli::{
    formatter::{format_size, CliFormatter},
    Cli, Commands, FailedAction, OutputFormat,
};
use ota_updater::engine::updater::{CancelToken, UpdateDescriptor, UpdateManager, UpdateType};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run_cli(cli) {
        CliFormatter::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    let json_output = cli.format == OutputFormat::Json;
    let mut config = cli.load_config().context("Failed to load configuration")?;

    if let Commands::Download { bundle_name: Some(name), .. } = &cli.command {
        config.bundle_file_name = name.clone();
    }

    let manager = UpdateManager::from_config(config)?;

    match cli.command {
        Commands::Status => cmd_status(&manager, json_output),
        Commands::Download { url, version_name, hash, install, .. } => {
            cmd_download(&manager, url, version_name, hash, install, json_output)
        }
        Commands::Check { download, install } => {
            cmd_check(&manager, download || install, install, json_output)
        }
        Commands::Install { hash } => cmd_install(&manager, &hash, json_output),
        Commands::Rollback => cmd_rollback(&manager, json_output),
        Commands::Ready => {
            manager.notify_app_ready()?;
            report(json_output, "Update confirmed");
            Ok(())
        }
        Commands::Clear => {
            manager.clear_updates()?;
            report(json_output, "All updates cleared");
            Ok(())
        }
        Commands::Failed { action } => cmd_failed(&manager, action, json_output),
        Commands::Path { hash } => cmd_path(&manager, hash, json_output),
    }
}

fn report(json: bool, message: &str) {
    if json {
        println!("{}", json!({ "ok": true, "message": message }));
    } else {
        CliFormatter::success(message);
    }
}

fn cmd_status(manager: &UpdateManager, json: bool) -> Result<()> {
    let status = manager.get_current_package_info();
    let current = manager.get_current_package();
    let pending = manager.tracker().get_pending_update();
    let packages = manager.store().list_packages()?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "root": manager.store().root(),
                "status": status,
                "current": current,
                "pending": pending,
                "bundlePath": manager.get_current_bundle_path(),
                "packages": packages,
            }))?
        );
        return Ok(());
    }

    CliFormatter::header("OTA Update Status");
    CliFormatter::kv("Store", &manager.store().root().display().to_string());
    CliFormatter::kv(
        "Current",
        status.current_package.as_deref().unwrap_or("(shipped bundle)"),
    );
    if let Some(version) = current.as_ref().and_then(|p| p.version_name.as_deref()) {
        CliFormatter::kv("Version", version);
    }
    CliFormatter::kv(
        "Previous",
        status.previous_package.as_deref().unwrap_or("(none)"),
    );
    match pending {
        Some(p) if p.is_loading => CliFormatter::kv("Pending", &format!("{} (launching)", p.hash)),
        Some(p) => CliFormatter::kv("Pending", &p.hash),
        None => CliFormatter::kv("Pending", "(none)"),
    }

    if !packages.is_empty() {
        CliFormatter::header("Packages");
        for hash in &packages {
            CliFormatter::item(hash);
        }
    }
    Ok(())
}

fn cmd_download(
    manager: &UpdateManager,
    url: String,
    version_name: Option<String>,
    hash: Option<String>,
    install: bool,
    json: bool,
) -> Result<()> {
    let descriptor = UpdateDescriptor {
        download_url: Some(url),
        version_name,
        package_hash: hash,
        ..Default::default()
    };

    let cancel = CancelToken::new();
    let package = manager.download_package(
        &descriptor,
        |progress| {
            if !json {
                CliFormatter::download_progress(&progress);
            }
        },
        &cancel,
    )?;
    if !json {
        eprintln!();
    }

    if install {
        manager.install_package(&package, false)?;
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "package": package,
                "installed": install,
            }))?
        );
    } else {
        CliFormatter::success(&format!("Downloaded package {}", package.package_hash));
        if install {
            CliFormatter::info("Installed; pending until the next launch confirms it");
        }
    }
    Ok(())
}

fn cmd_check(manager: &UpdateManager, download: bool, install: bool, json: bool) -> Result<()> {
    if manager.version_checker().is_none() {
        return Err(anyhow!("No update server configured (add a \"server\" section to the config)"));
    }

    let current = manager.current_app_version();
    let check = manager.check_for_updates()?;
    let update = match check.update.as_ref().filter(|_| check.update_available) {
        Some(update) => update,
        None => {
            if json {
                println!("{}", serde_json::to_string_pretty(&check)?);
            } else {
                CliFormatter::info(check.message.as_deref().unwrap_or("No update available"));
            }
            return Ok(());
        }
    };
    let update_type = update.effective_update_type(&current);

    if !json {
        CliFormatter::header("Update Available");
        CliFormatter::kv("Installed", &current.version_name);
        CliFormatter::kv("Offered", &update.version_name);
        CliFormatter::kv("Type", &update_type.to_string());
        if let Some(notes) = &update.release_notes {
            CliFormatter::kv("Notes", notes);
        }
        if let Some(size) = update.bundle_size {
            CliFormatter::kv("Bundle size", &format_size(size));
        }
        if let Some(url) = update.download_url.as_deref().filter(|_| update_type == UpdateType::Major) {
            CliFormatter::kv("App download", url);
        }
    }

    let package = if download {
        let package = manager.apply_update(
            update,
            install,
            |progress| {
                if !json {
                    CliFormatter::download_progress(&progress);
                }
            },
            &CancelToken::new(),
        )?;
        if !json {
            eprintln!();
            CliFormatter::success(&format!("Downloaded package {}", package.package_hash));
            if install {
                CliFormatter::info("Installed; pending until the next launch confirms it");
            }
        }
        Some(package)
    } else {
        None
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "check": check,
                "updateType": update_type,
                "package": package,
                "installed": install && package.is_some(),
            }))?
        );
    }
    Ok(())
}

fn cmd_install(manager: &UpdateManager, hash: &str, json: bool) -> Result<()> {
    let package = manager
        .store()
        .get_package(hash)
        .ok_or_else(|| anyhow!("Package not found: {}", hash))?;
    manager.install_package(&package, false)?;
    report(json, &format!("Installed package {}", hash));
    Ok(())
}

fn cmd_rollback(manager: &UpdateManager, json: bool) -> Result<()> {
    let restored = manager.rollback()?;

    if json {
        println!("{}", json!({ "ok": true, "restored": restored }));
        return Ok(());
    }

    match restored {
        Some(package) => CliFormatter::success(&format!("Rolled back to {}", package.package_hash)),
        None => CliFormatter::warning("No previous package; reverted to the shipped bundle"),
    }
    Ok(())
}

fn cmd_failed(manager: &UpdateManager, action: FailedAction, json: bool) -> Result<()> {
    match action {
        FailedAction::List => {
            let failed = manager.tracker().get_failed_updates();
            if json {
                println!("{}", serde_json::to_string_pretty(&failed)?);
            } else if failed.is_empty() {
                CliFormatter::info("No failed updates");
            } else {
                CliFormatter::header("Failed Updates");
                for package in &failed {
                    let version = package.version_name.as_deref().unwrap_or("?");
                    CliFormatter::item(&format!("{} ({})", package.package_hash, version));
                }
            }
        }
        FailedAction::Clear => {
            manager.tracker().remove_failed_updates()?;
            report(json, "Failed updates cleared");
        }
    }
    Ok(())
}

fn cmd_path(manager: &UpdateManager, hash: Option<String>, json: bool) -> Result<()> {
    let path = match &hash {
        Some(hash) => manager.resolve_bundle_path(hash),
        None => manager.get_current_bundle_path(),
    };

    if json {
        println!("{}", json!({ "hash": hash, "bundlePath": path }));
        return Ok(());
    }

    match path {
        Some(path) => println!("{}", path.display()),
        None => return Err(anyhow!("No downloaded bundle")),
    }
    Ok(())
}
