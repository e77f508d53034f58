//! CLI Output Formatting Module
//! Colorized terminal output for ota-cli

use colored::Colorize;
use std::io::Write;

use crate::engine::updater::DownloadProgress;

pub struct CliFormatter;

impl CliFormatter {
    /// Print a success message
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    /// Print an error message
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    /// Print a warning message
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message);
    }

    /// Print an info message
    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue().bold(), message);
    }

    /// Print a section header
    pub fn header(title: &str) {
        println!("\n{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(title.len()).bright_black());
    }

    /// Print a key-value pair
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.bright_white().bold(), value);
    }

    /// Print a list item
    pub fn item(text: &str) {
        println!("  {} {}", "•".bright_black(), text);
    }

    /// Redraw the download progress line on stderr
    pub fn download_progress(progress: &DownloadProgress) {
        let line = match (progress.total_bytes, progress.percentage()) {
            (Some(total), Some(percentage)) => {
                let filled = (percentage / 5) as usize;
                format!(
                    "  [{}{}] {}% {} / {}",
                    "█".repeat(filled).bright_green(),
                    "░".repeat(20 - filled.min(20)).bright_black(),
                    percentage,
                    format_size(progress.received_bytes),
                    format_size(total)
                )
            }
            _ => format!("  {} {}", "▶".bright_blue(), format_size(progress.received_bytes)),
        };
        eprint!("\r{}", line);
        std::io::stderr().flush().ok();
    }
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}
