//! Package Store
//!
//! Owns the on-disk layout of downloaded packages:
//!
//! ```text
//! <root>/
//!   ota.json            current / previous pointers
//!   download.zip        payload being downloaded
//!   unzipped/           scratch space for archive extraction
//!   .tmp-<hash>/        package being assembled
//!   <hash>/app.json     package metadata
//!   <hash>/...          bundle and assets
//! ```
//!
//! A package folder only becomes visible under its hash once its metadata
//! is written, and the pointers only ever name visible folders. Callers must
//! not run two downloads or installs against the same root at once.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use super::digest;
use super::download::{CancelToken, DownloadProgress, DownloadResult, Downloader, PayloadKind};
use super::error::{Result, UpdateError};
use super::extract;
use super::package::{Package, StatusRecord, UpdateDescriptor};

pub const STATUS_FILE: &str = "ota.json";
pub const PACKAGE_FILE_NAME: &str = "app.json";
pub const DOWNLOAD_FILE_NAME: &str = "download.zip";
pub const UNZIPPED_FOLDER_NAME: &str = "unzipped";
const STAGING_PREFIX: &str = ".tmp-";

const RESERVED_NAMES: [&str; 3] = [STATUS_FILE, DOWNLOAD_FILE_NAME, UNZIPPED_FOLDER_NAME];

/// A hash is used as a folder name, so it must be one plain path component
/// that does not collide with the store's own entries
pub fn is_valid_package_hash(hash: &str) -> bool {
    !hash.is_empty()
        && !hash.starts_with('.')
        && !hash.ends_with(".tmp")
        && !RESERVED_NAMES.contains(&hash)
        && !hash.contains(['/', '\\'])
        && Path::new(hash).components().count() == 1
}

/// Serialize `value` next to `path` and rename it into place
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    let temp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// First component of a path below the root, if something lies beneath it
fn hash_component<'a>(mut components: impl Iterator<Item = Component<'a>>) -> Option<String> {
    let hash = match components.next()? {
        Component::Normal(name) => name.to_str()?.to_string(),
        _ => return None,
    };
    components.next()?;
    Some(hash)
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Content- and version-addressed store of downloaded packages
pub struct PackageStore {
    root: PathBuf,
    bundle_file_name: String,
    downloader: Downloader,
}

impl PackageStore {
    pub fn new(root: PathBuf, bundle_file_name: impl Into<String>, downloader: Downloader) -> Self {
        Self {
            root,
            bundle_file_name: bundle_file_name.into(),
            downloader,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bundle_file_name(&self) -> &str {
        &self.bundle_file_name
    }

    pub fn status_path(&self) -> PathBuf {
        self.root.join(STATUS_FILE)
    }

    pub fn download_file_path(&self) -> PathBuf {
        self.root.join(DOWNLOAD_FILE_NAME)
    }

    pub fn unzipped_path(&self) -> PathBuf {
        self.root.join(UNZIPPED_FOLDER_NAME)
    }

    pub fn package_path(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    fn staging_path(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{}{}", STAGING_PREFIX, hash))
    }

    fn retired_path(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{}old-{}", STAGING_PREFIX, hash))
    }

    // ========== Pointers ==========

    /// Current / previous pointers. Missing or unreadable records are empty.
    pub fn get_current_package_info(&self) -> StatusRecord {
        let path = self.status_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!("Unable to read status record {:?}: {}", path, e);
                }
                return StatusRecord::default();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring corrupt status record {:?}: {}", path, e);
            StatusRecord::default()
        })
    }

    fn save_status(&self, status: &StatusRecord) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        write_json_atomic(&self.status_path(), status)
    }

    pub fn get_current_package_hash(&self) -> Option<String> {
        self.get_current_package_info().current_package
    }

    pub fn get_previous_package_hash(&self) -> Option<String> {
        self.get_current_package_info().previous_package
    }

    // ========== Packages ==========

    /// Metadata of a downloaded package. Any read or parse failure is absence.
    pub fn get_package(&self, hash: &str) -> Option<Package> {
        if !is_valid_package_hash(hash) {
            return None;
        }

        let path = self.package_path(hash).join(PACKAGE_FILE_NAME);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(package) => Some(package),
            Err(e) => {
                tracing::debug!("Unreadable package metadata {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn get_current_package(&self) -> Option<Package> {
        self.get_package(&self.get_current_package_hash()?)
    }

    pub fn get_previous_package(&self) -> Option<Package> {
        self.get_package(&self.get_previous_package_hash()?)
    }

    /// Absolute path of a package's bundle file
    pub fn resolve_bundle_path(&self, hash: &str) -> Option<PathBuf> {
        let package = self.get_package(hash)?;
        let folder = self.package_path(hash);
        let relative = package
            .relative_bundle_path
            .as_deref()
            .unwrap_or(&self.bundle_file_name);
        Some(relative.split('/').fold(folder, |path, part| path.join(part)))
    }

    pub fn get_current_bundle_path(&self) -> Option<PathBuf> {
        self.resolve_bundle_path(&self.get_current_package_hash()?)
    }

    /// Package hash owning a path inside a package folder, e.g. a bundle path
    pub fn package_hash_for_path(&self, path: &Path) -> Option<String> {
        let hash = if let Ok(relative) = path.strip_prefix(&self.root) {
            hash_component(relative.components())
        } else {
            // Fall back to the segment after the store's folder name
            let root_name = self.root.file_name()?;
            let mut components = path.components();
            components
                .by_ref()
                .find(|c| matches!(c, Component::Normal(name) if *name == root_name))?;
            hash_component(components)
        }?;

        is_valid_package_hash(&hash).then_some(hash)
    }

    /// Published package folders, sorted by name
    pub fn list_packages(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(vec![]);
        }

        let mut packages = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_valid_package_hash(name) {
                    packages.push(name.to_string());
                }
            }
        }
        packages.sort();
        Ok(packages)
    }

    // ========== Install ==========

    /// Promote a downloaded package to current.
    ///
    /// With `remove_pending_update` the current package is discarded instead
    /// of being kept as previous. Otherwise the old current becomes previous
    /// and the old previous is deleted, keeping at most two generations.
    pub fn install_package(&self, package: &Package, remove_pending_update: bool) -> Result<()> {
        let hash = &package.package_hash;
        let mut status = self.get_current_package_info();

        if status.current_package.as_deref() == Some(hash.as_str()) {
            tracing::debug!("Package {} is already current", hash);
            return Ok(());
        }

        if self.get_package(hash).is_none() {
            return Err(UpdateError::InvalidUpdate(format!(
                "Package {} has not been downloaded",
                hash
            )));
        }

        let mut discarded = None;
        if remove_pending_update {
            discarded = status.current_package.take();
            if status.previous_package.as_deref() == Some(hash.as_str()) {
                status.previous_package = None;
            }
        } else {
            if let Some(previous) = status.previous_package.take() {
                if &previous != hash && status.current_package.as_deref() != Some(previous.as_str()) {
                    discarded = Some(previous);
                }
            }
            status.previous_package = status.current_package.take();
        }

        status.current_package = Some(hash.clone());
        self.save_status(&status)?;
        tracing::info!(
            "Installed package {} (previous: {:?})",
            hash,
            status.previous_package
        );

        // No pointer names it any more, so a crash here only leaks a folder
        if let Some(discarded) = discarded {
            tracing::info!("Removing superseded package {}", discarded);
            remove_dir_if_exists(&self.package_path(&discarded))?;
        }

        Ok(())
    }

    /// Delete every package and the status record
    pub fn clear_updates(&self) -> Result<()> {
        tracing::info!("Clearing all updates under {:?}", self.root);
        remove_dir_if_exists(&self.root)
    }

    // ========== Download ==========

    /// Download, unpack and register the package described by `descriptor`.
    ///
    /// Nothing is published under the package hash unless every step
    /// succeeds; metadata is the last file written. A hash that is already
    /// downloaded is returned as is and its folder is never touched.
    pub fn download_package<F>(
        &self,
        descriptor: &UpdateDescriptor,
        expected_bundle_file_name: &str,
        on_progress: F,
        cancel: &CancelToken,
    ) -> Result<Package>
    where
        F: FnMut(DownloadProgress),
    {
        let url = descriptor.require_download_url()?;
        if let Some(hash) = descriptor.package_hash.as_deref() {
            if !is_valid_package_hash(hash) {
                return Err(UpdateError::MalformedDescriptor(format!(
                    "Invalid package hash: {:?}",
                    hash
                )));
            }
        }

        if let Some(existing) = descriptor.package_hash.as_deref().and_then(|h| self.get_package(h)) {
            tracing::info!("Package {} is already downloaded", existing.package_hash);
            return Ok(existing);
        }

        fs::create_dir_all(&self.root)?;
        self.cleanup_staging()?;

        let download = self
            .downloader
            .download(url, &self.download_file_path(), on_progress, cancel)?;

        let hash = match descriptor.package_hash.clone() {
            Some(hash) => hash,
            None => match digest::calculate_sha256(&download.path) {
                Ok(hash) => {
                    tracing::info!("Derived package hash {} from payload", hash);
                    hash
                }
                Err(e) => {
                    self.discard_partial(None);
                    return Err(e.into());
                }
            },
        };

        if cancel.is_cancelled() {
            self.discard_partial(Some(&hash));
            return Err(UpdateError::Cancelled);
        }

        if let Some(existing) = self.get_package(&hash) {
            tracing::info!("Payload matches downloaded package {}", hash);
            self.discard_partial(None);
            return Ok(existing);
        }

        let result = self.stage_package(descriptor, &hash, &download, expected_bundle_file_name);
        if let Err(e) = &result {
            tracing::warn!("Discarding package {}: {}", hash, e);
            self.discard_partial(Some(&hash));
        }
        result
    }

    fn stage_package(
        &self,
        descriptor: &UpdateDescriptor,
        hash: &str,
        download: &DownloadResult,
        expected_bundle_file_name: &str,
    ) -> Result<Package> {
        let staging = self.staging_path(hash);
        remove_dir_if_exists(&staging)?;
        fs::create_dir_all(&staging)?;

        let relative_bundle_path = match download.kind {
            PayloadKind::Archive => {
                let scratch = self.unzipped_path();
                extract::unzip_file(&download.path, &scratch)?;
                remove_file_if_exists(&download.path)?;

                extract::merge_directory(&scratch, &staging)?;
                remove_dir_if_exists(&scratch)?;

                let found = extract::find_bundle(&staging, expected_bundle_file_name)?
                    .ok_or_else(|| {
                        UpdateError::InvalidUpdate(format!(
                            "A bundle file named {:?} could not be found within the downloaded contents",
                            expected_bundle_file_name
                        ))
                    })?;
                tracing::debug!("Found bundle at {}", found);
                Some(found)
            }
            PayloadKind::RawBundle => {
                extract::place_bundle(&download.path, &staging, expected_bundle_file_name)?;
                // Resolution falls back to the configured name, so only record a different one
                (expected_bundle_file_name != self.bundle_file_name)
                    .then(|| expected_bundle_file_name.to_string())
            }
        };

        let package = Package::from_descriptor(descriptor, hash.to_string(), relative_bundle_path)?;
        write_json_atomic(&staging.join(PACKAGE_FILE_NAME), &package)?;

        self.publish(&staging, hash)?;
        tracing::info!("Downloaded package {} to {:?}", hash, self.package_path(hash));
        Ok(package)
    }

    /// Rename a staged folder into place. A folder already under the hash
    /// (one without readable metadata) is moved aside first and only deleted
    /// once the new folder is published.
    fn publish(&self, staging: &Path, hash: &str) -> Result<()> {
        let final_path = self.package_path(hash);
        if !final_path.exists() {
            fs::rename(staging, &final_path)?;
            return Ok(());
        }

        let retired = self.retired_path(hash);
        remove_dir_if_exists(&retired)?;
        fs::rename(&final_path, &retired)?;

        if let Err(e) = fs::rename(staging, &final_path) {
            if let Err(restore) = fs::rename(&retired, &final_path) {
                tracing::warn!("Unable to restore package folder {:?}: {}", final_path, restore);
            }
            return Err(e.into());
        }

        if let Err(e) = remove_dir_if_exists(&retired) {
            tracing::warn!("Unable to remove replaced package folder {:?}: {}", retired, e);
        }
        Ok(())
    }

    /// Delete a package folder unless a pointer still names it
    pub fn remove_package(&self, hash: &str) -> Result<bool> {
        if !is_valid_package_hash(hash) {
            return Ok(false);
        }

        let status = self.get_current_package_info();
        if status.current_package.as_deref() == Some(hash)
            || status.previous_package.as_deref() == Some(hash)
        {
            tracing::warn!("Keeping package {}: it is still referenced", hash);
            return Ok(false);
        }

        tracing::info!("Removing package {}", hash);
        remove_dir_if_exists(&self.package_path(hash))?;
        Ok(true)
    }

    /// Best-effort removal of everything a failed download left behind
    fn discard_partial(&self, hash: Option<&str>) {
        let mut leftovers = vec![self.download_file_path(), self.unzipped_path()];
        if let Some(hash) = hash {
            leftovers.push(self.staging_path(hash));
        }

        for path in leftovers {
            let result = if path.is_dir() {
                remove_dir_if_exists(&path)
            } else {
                remove_file_if_exists(&path)
            };
            if let Err(e) = result {
                tracing::warn!("Unable to remove {:?}: {}", path, e);
            }
        }
    }

    /// Remove staging folders and scratch files from interrupted downloads
    pub fn cleanup_staging(&self) -> Result<()> {
        if !self.root.exists() {
            return Ok(());
        }

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(STAGING_PREFIX) {
                remove_dir_if_exists(&entry.path())?;
            }
        }
        remove_dir_if_exists(&self.unzipped_path())?;
        remove_file_if_exists(&self.download_file_path())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::updater::download::{Payload, Transport};
    use std::io::{Cursor, Write as _};
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};
    use zip::write::SimpleFileOptions;

    const BUNDLE: &str = "index.android.bundle";

    struct FixedTransport {
        body: Vec<u8>,
        content_length: Option<u64>,
    }

    impl Transport for FixedTransport {
        fn open(&self, _url: &str) -> Result<Payload> {
            Ok(Payload {
                reader: Box::new(Cursor::new(self.body.clone())),
                content_length: self.content_length,
            })
        }
    }

    fn store_serving(dir: &TempDir, body: Vec<u8>, content_length: Option<u64>) -> PackageStore {
        let transport = Arc::new(FixedTransport { body, content_length });
        PackageStore::new(dir.path().join("OTAUpdates"), BUNDLE, Downloader::new(transport))
    }

    fn empty_store(dir: &TempDir) -> PackageStore {
        store_serving(dir, Vec::new(), None)
    }

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    /// Put a package on disk the way a finished download leaves it
    fn seed_package(store: &PackageStore, hash: &str) -> Package {
        let folder = store.package_path(hash);
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join(BUNDLE), hash).unwrap();

        let descriptor = UpdateDescriptor::new(format!("https://x/{}", hash), "1.0.0");
        let package = Package::from_descriptor(&descriptor, hash.to_string(), None).unwrap();
        write_json_atomic(&folder.join(PACKAGE_FILE_NAME), &package).unwrap();
        package
    }

    #[test]
    fn test_missing_status_is_empty() {
        let dir = tempdir().unwrap();
        let store = empty_store(&dir);

        assert!(store.get_current_package_info().is_empty());
        assert!(store.get_current_package().is_none());
        assert!(store.get_previous_package().is_none());
        assert!(store.get_current_bundle_path().is_none());
    }

    #[test]
    fn test_corrupt_status_is_empty() {
        let dir = tempdir().unwrap();
        let store = empty_store(&dir);
        fs::create_dir_all(store.root()).unwrap();
        fs::write(store.status_path(), "{{{").unwrap();

        assert!(store.get_current_package_info().is_empty());
    }

    #[test]
    fn test_get_package_unreadable_is_absent() {
        let dir = tempdir().unwrap();
        let store = empty_store(&dir);
        fs::create_dir_all(store.package_path("bad")).unwrap();
        fs::write(store.package_path("bad").join(PACKAGE_FILE_NAME), "nope").unwrap();

        assert!(store.get_package("bad").is_none());
        assert!(store.get_package("missing").is_none());
        assert!(store.get_package("../escape").is_none());
    }

    #[test]
    fn test_install_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = empty_store(&dir);
        let a = seed_package(&store, "a");
        let b = seed_package(&store, "b");

        store.install_package(&a, false).unwrap();
        store.install_package(&b, false).unwrap();
        let before = store.get_current_package_info();

        store.install_package(&b, false).unwrap();
        assert_eq!(store.get_current_package_info(), before);
        assert!(store.package_path("a").exists());
    }

    #[test]
    fn test_retention_bound() {
        let dir = tempdir().unwrap();
        let store = empty_store(&dir);
        let a = seed_package(&store, "a");
        let b = seed_package(&store, "b");
        let c = seed_package(&store, "c");

        store.install_package(&a, false).unwrap();
        assert_eq!(store.get_current_package_hash().as_deref(), Some("a"));
        assert!(store.get_previous_package_hash().is_none());

        store.install_package(&b, false).unwrap();
        assert_eq!(store.get_current_package_hash().as_deref(), Some("b"));
        assert_eq!(store.get_previous_package_hash().as_deref(), Some("a"));
        assert!(store.package_path("a").exists());

        store.install_package(&c, false).unwrap();
        assert_eq!(store.get_current_package_hash().as_deref(), Some("c"));
        assert_eq!(store.get_previous_package_hash().as_deref(), Some("b"));
        assert!(!store.package_path("a").exists());
        assert_eq!(store.list_packages().unwrap(), vec!["b", "c"]);
    }

    #[test]
    fn test_install_removing_pending_discards_current() {
        let dir = tempdir().unwrap();
        let store = empty_store(&dir);
        let a = seed_package(&store, "a");
        let b = seed_package(&store, "b");
        let c = seed_package(&store, "c");

        store.install_package(&a, false).unwrap();
        store.install_package(&b, false).unwrap();
        store.install_package(&c, true).unwrap();

        let status = store.get_current_package_info();
        assert_eq!(status.current_package.as_deref(), Some("c"));
        assert_eq!(status.previous_package.as_deref(), Some("a"));
        assert!(!store.package_path("b").exists());
        assert!(store.package_path("a").exists());
    }

    #[test]
    fn test_reinstall_previous_removing_pending() {
        let dir = tempdir().unwrap();
        let store = empty_store(&dir);
        let a = seed_package(&store, "a");
        let b = seed_package(&store, "b");

        store.install_package(&a, false).unwrap();
        store.install_package(&b, false).unwrap();
        store.install_package(&a, true).unwrap();

        let status = store.get_current_package_info();
        assert_eq!(status.current_package.as_deref(), Some("a"));
        assert!(status.previous_package.is_none());
        assert!(!store.package_path("b").exists());

        let c = seed_package(&store, "c");
        store.install_package(&c, false).unwrap();
        assert!(store.package_path("a").exists());
        assert_eq!(store.get_previous_package_hash().as_deref(), Some("a"));
    }

    #[test]
    fn test_install_requires_downloaded_package() {
        let dir = tempdir().unwrap();
        let store = empty_store(&dir);
        let descriptor = UpdateDescriptor::new("https://x/ghost", "1.0.0");
        let ghost = Package::from_descriptor(&descriptor, "ghost".to_string(), None).unwrap();

        let err = store.install_package(&ghost, false).unwrap_err();
        assert!(matches!(err, UpdateError::InvalidUpdate(_)));
        assert!(store.get_current_package_info().is_empty());
    }

    #[test]
    fn test_clear_updates() {
        let dir = tempdir().unwrap();
        let store = empty_store(&dir);
        let a = seed_package(&store, "a");
        store.install_package(&a, false).unwrap();

        store.clear_updates().unwrap();
        assert!(!store.root().exists());
        assert!(store.get_current_package_info().is_empty());
        store.clear_updates().unwrap();
    }

    #[test]
    fn test_download_archive_package() {
        let dir = tempdir().unwrap();
        let body = zip_bytes(&[
            ("build/index.android.bundle", "bundle"),
            ("build/assets/icon.png", "png"),
        ]);
        let len = body.len() as u64;
        let store = store_serving(&dir, body, Some(len));

        let mut descriptor = UpdateDescriptor::new("https://x/1.1.0.zip", "1.1.0");
        descriptor.package_hash = Some("h110".to_string());

        let package = store
            .download_package(&descriptor, BUNDLE, |_| {}, &CancelToken::new())
            .unwrap();

        assert_eq!(package.package_hash, "h110");
        assert_eq!(package.relative_bundle_path.as_deref(), Some("build/index.android.bundle"));
        assert_eq!(store.get_package("h110"), Some(package));
        assert_eq!(
            store.resolve_bundle_path("h110").unwrap(),
            store.package_path("h110").join("build").join(BUNDLE)
        );
        assert!(!store.download_file_path().exists());
        assert!(!store.unzipped_path().exists());
        assert_eq!(store.list_packages().unwrap(), vec!["h110"]);
    }

    #[test]
    fn test_download_raw_bundle_derives_hash() {
        let dir = tempdir().unwrap();
        let store = store_serving(&dir, b"hello world".to_vec(), Some(11));

        let descriptor = UpdateDescriptor::new("https://x/bundle.js", "2.0.0");
        let package = store
            .download_package(&descriptor, BUNDLE, |_| {}, &CancelToken::new())
            .unwrap();

        assert_eq!(
            package.package_hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert!(package.relative_bundle_path.is_none());
        let bundle = store.resolve_bundle_path(&package.package_hash).unwrap();
        assert_eq!(fs::read_to_string(bundle).unwrap(), "hello world");
    }

    #[test]
    fn test_download_length_mismatch_registers_nothing() {
        let dir = tempdir().unwrap();
        let store = store_serving(&dir, vec![1u8; 998], Some(1000));

        let mut descriptor = UpdateDescriptor::new("https://x/short", "1.0.0");
        descriptor.package_hash = Some("short".to_string());

        let err = store
            .download_package(&descriptor, BUNDLE, |_| {}, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, UpdateError::ContentIntegrity { expected: 1000, received: 998 }));
        assert!(!store.package_path("short").exists());
        assert!(store.get_package("short").is_none());
        assert!(store.get_current_package_info().is_empty());
    }

    #[test]
    fn test_download_archive_without_bundle_is_invalid() {
        let dir = tempdir().unwrap();
        let body = zip_bytes(&[("main.js", "x")]);
        let store = store_serving(&dir, body, None);

        let mut descriptor = UpdateDescriptor::new("https://x/bad.zip", "1.0.0");
        descriptor.package_hash = Some("bad".to_string());

        let err = store
            .download_package(&descriptor, BUNDLE, |_| {}, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, UpdateError::InvalidUpdate(_)));
        assert!(!store.package_path("bad").exists());
        assert!(store.list_packages().unwrap().is_empty());
        assert!(!store.download_file_path().exists());
    }

    #[test]
    fn test_download_rejects_missing_url_and_bad_hash() {
        let dir = tempdir().unwrap();
        let store = empty_store(&dir);

        let no_url = UpdateDescriptor::default();
        let err = store
            .download_package(&no_url, BUNDLE, |_| {}, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, UpdateError::MalformedDescriptor(_)));

        let mut bad_hash = UpdateDescriptor::new("https://x/a", "1.0.0");
        bad_hash.package_hash = Some("../../etc".to_string());
        let err = store
            .download_package(&bad_hash, BUNDLE, |_| {}, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, UpdateError::MalformedDescriptor(_)));
    }

    #[test]
    fn test_failed_redownload_keeps_current_pointer() {
        let dir = tempdir().unwrap();
        let good = store_serving(&dir, b"good".to_vec(), Some(4));
        let mut descriptor = UpdateDescriptor::new("https://x/good", "1.0.0");
        descriptor.package_hash = Some("good".to_string());
        let package = good
            .download_package(&descriptor, BUNDLE, |_| {}, &CancelToken::new())
            .unwrap();
        good.install_package(&package, false).unwrap();

        let broken = store_serving(&dir, b"goo".to_vec(), Some(4));
        let mut next = UpdateDescriptor::new("https://x/next", "1.1.0");
        next.package_hash = Some("next".to_string());
        assert!(broken
            .download_package(&next, BUNDLE, |_| {}, &CancelToken::new())
            .is_err());

        assert_eq!(broken.get_current_package_hash().as_deref(), Some("good"));
        assert!(broken.get_current_package().is_some());
        assert_eq!(broken.list_packages().unwrap(), vec!["good"]);
    }

    #[test]
    fn test_package_hash_for_path() {
        let dir = tempdir().unwrap();
        let store = empty_store(&dir);

        let inside = store.package_path("abc").join("build").join(BUNDLE);
        assert_eq!(store.package_hash_for_path(&inside).as_deref(), Some("abc"));

        let foreign = Path::new("/data/user/0/app/files/OTAUpdates/xyz/index.android.bundle");
        assert_eq!(store.package_hash_for_path(foreign).as_deref(), Some("xyz"));

        assert!(store.package_hash_for_path(Path::new("/tmp/elsewhere")).is_none());
        assert!(store.package_hash_for_path(&store.status_path()).is_none());
    }

    #[test]
    fn test_cleanup_staging() {
        let dir = tempdir().unwrap();
        let store = empty_store(&dir);
        fs::create_dir_all(store.root().join(".tmp-abc")).unwrap();
        fs::create_dir_all(store.unzipped_path()).unwrap();
        fs::write(store.download_file_path(), "partial").unwrap();
        seed_package(&store, "kept");

        store.cleanup_staging().unwrap();
        assert!(!store.root().join(".tmp-abc").exists());
        assert!(!store.unzipped_path().exists());
        assert!(!store.download_file_path().exists());
        assert_eq!(store.list_packages().unwrap(), vec!["kept"]);
    }

    #[test]
    fn test_valid_package_hash() {
        assert!(is_valid_package_hash("1234abcd"));
        assert!(is_valid_package_hash("-1523"));
        assert!(is_valid_package_hash("v1.2.0"));
        assert!(!is_valid_package_hash(""));
        assert!(!is_valid_package_hash(".."));
        assert!(!is_valid_package_hash("a/b"));
        assert!(!is_valid_package_hash(".tmp-x"));
        assert!(!is_valid_package_hash("unzipped"));
        assert!(!is_valid_package_hash("ota.json"));
        assert!(!is_valid_package_hash("ota.tmp"));
        assert!(!is_valid_package_hash("download.zip"));
    }

    #[test]
    fn test_download_rejects_reserved_hashes() {
        let dir = tempdir().unwrap();
        let store = store_serving(&dir, b"bundle".to_vec(), Some(6));

        for reserved in ["download.zip", "ota.json", "ota.tmp", "unzipped"] {
            let mut descriptor = UpdateDescriptor::new("https://x/bundle.js", "1.0.0");
            descriptor.package_hash = Some(reserved.to_string());
            let err = store
                .download_package(&descriptor, BUNDLE, |_| {}, &CancelToken::new())
                .unwrap_err();
            assert!(matches!(err, UpdateError::MalformedDescriptor(_)), "{}", reserved);
        }

        let mut good = UpdateDescriptor::new("https://x/bundle.js", "1.0.0");
        good.package_hash = Some("good".to_string());
        store
            .download_package(&good, BUNDLE, |_| {}, &CancelToken::new())
            .unwrap();
        assert_eq!(store.list_packages().unwrap(), vec!["good"]);
        assert!(!store.root().join("download.zip").is_dir());
    }

    #[test]
    fn test_redownload_current_keeps_live_folder() {
        let dir = tempdir().unwrap();
        let store = store_serving(&dir, b"bundle".to_vec(), Some(6));
        let mut descriptor = UpdateDescriptor::new("https://x/bundle.js", "1.0.0");
        descriptor.package_hash = Some("h1".to_string());

        let package = store
            .download_package(&descriptor, BUNDLE, |_| {}, &CancelToken::new())
            .unwrap();
        store.install_package(&package, false).unwrap();
        fs::write(store.package_path("h1").join("live-marker"), "running").unwrap();

        let again = store
            .download_package(&descriptor, BUNDLE, |_| {}, &CancelToken::new())
            .unwrap();
        assert_eq!(again, package);
        assert!(store.package_path("h1").join("live-marker").exists());
        assert_eq!(store.get_current_package_hash().as_deref(), Some("h1"));
    }

    #[test]
    fn test_derived_hash_of_existing_package_is_reused() {
        let dir = tempdir().unwrap();
        let store = store_serving(&dir, b"hello world".to_vec(), Some(11));
        let descriptor = UpdateDescriptor::new("https://x/bundle.js", "2.0.0");

        let first = store
            .download_package(&descriptor, BUNDLE, |_| {}, &CancelToken::new())
            .unwrap();
        store.install_package(&first, false).unwrap();
        let marker = store.package_path(&first.package_hash).join("live-marker");
        fs::write(&marker, "running").unwrap();

        let second = store
            .download_package(&descriptor, BUNDLE, |_| {}, &CancelToken::new())
            .unwrap();
        assert_eq!(second.package_hash, first.package_hash);
        assert!(marker.exists());
        assert!(!store.download_file_path().exists());
    }

    #[test]
    fn test_download_replaces_folder_without_metadata() {
        let dir = tempdir().unwrap();
        let store = store_serving(&dir, b"fresh".to_vec(), Some(5));
        fs::create_dir_all(store.package_path("h2")).unwrap();
        fs::write(store.package_path("h2").join("leftover"), "x").unwrap();

        let mut descriptor = UpdateDescriptor::new("https://x/bundle.js", "1.0.0");
        descriptor.package_hash = Some("h2".to_string());
        store
            .download_package(&descriptor, BUNDLE, |_| {}, &CancelToken::new())
            .unwrap();

        assert!(!store.package_path("h2").join("leftover").exists());
        assert!(store.get_package("h2").is_some());
        assert!(!store.retired_path("h2").exists());
    }

    #[test]
    fn test_raw_bundle_with_custom_name_resolves() {
        let dir = tempdir().unwrap();
        let store = store_serving(&dir, b"ios bundle".to_vec(), Some(10));
        let mut descriptor = UpdateDescriptor::new("https://x/main.jsbundle", "1.0.0");
        descriptor.package_hash = Some("h1".to_string());

        let package = store
            .download_package(&descriptor, "main.jsbundle", |_| {}, &CancelToken::new())
            .unwrap();
        assert_eq!(package.relative_bundle_path.as_deref(), Some("main.jsbundle"));

        // A fresh store with the default name, as a later process would build
        let reopened = empty_store(&dir);
        let bundle = reopened.resolve_bundle_path("h1").unwrap();
        assert_eq!(bundle, reopened.package_path("h1").join("main.jsbundle"));
        assert_eq!(fs::read_to_string(bundle).unwrap(), "ios bundle");
    }

    #[test]
    fn test_remove_package_keeps_referenced() {
        let dir = tempdir().unwrap();
        let store = empty_store(&dir);
        let a = seed_package(&store, "a");
        seed_package(&store, "b");
        store.install_package(&a, false).unwrap();

        assert!(!store.remove_package("a").unwrap());
        assert!(store.package_path("a").exists());
        assert!(store.remove_package("b").unwrap());
        assert!(!store.package_path("b").exists());
    }
}
