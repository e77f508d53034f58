//! Archive Extraction
//!
//! Unpacks archive payloads, merges them into a package folder and locates
//! the bundle file anywhere in the resulting tree.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use zip::ZipArchive;

use super::error::Result;

/// Extract every entry of a ZIP archive into `dest`.
///
/// Entries whose names escape `dest` are skipped.
pub fn unzip_file(archive_path: &Path, dest: &Path) -> Result<()> {
    tracing::debug!("Extracting {:?} to {:?}", archive_path, dest);

    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;

    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!("Skipping archive entry with unsafe path: {}", entry.name());
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out_file = File::create(&out_path)?;
        io::copy(&mut entry, &mut out_file)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode))?;
            }
        }
    }

    Ok(())
}

/// Copy the full subtree of `src` into `dest`, overwriting files that exist
pub fn merge_directory(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            merge_directory(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Move a raw bundle into `dest_dir` under `bundle_file_name`
pub fn place_bundle(download_path: &Path, dest_dir: &Path, bundle_file_name: &str) -> Result<()> {
    fs::create_dir_all(dest_dir)?;
    let target = dest_dir.join(bundle_file_name);

    if fs::rename(download_path, &target).is_err() {
        // Rename fails across filesystems
        fs::copy(download_path, &target)?;
        fs::remove_file(download_path)?;
    }
    Ok(())
}

/// Find `bundle_file_name` under `root`.
///
/// The root level wins; otherwise subdirectories are searched depth-first in
/// name order. Returns the `/`-joined path relative to `root`.
pub fn find_bundle(root: &Path, bundle_file_name: &str) -> Result<Option<String>> {
    if !root.is_dir() {
        return Ok(None);
    }

    if root.join(bundle_file_name).is_file() {
        return Ok(Some(bundle_file_name.to_string()));
    }

    let mut subdirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            subdirs.push(entry.file_name());
        }
    }
    subdirs.sort();

    for name in subdirs {
        if let Some(found) = find_bundle(&root.join(&name), bundle_file_name)? {
            return Ok(Some(format!("{}/{}", name.to_string_lossy(), found)));
        }
    }

    Ok(None)
}
