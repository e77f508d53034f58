//! Settings Store
//!
//! Small synchronous key-value store backing the update bookkeeping.
//! Writes return only once committed; reads in the same process observe them.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::error::Result;

/// Persisted string key-value store
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory store, for tests and hosts that persist settings themselves
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.values).remove(key);
        Ok(())
    }
}

/// JSON-file backed store
///
/// Every operation re-reads the file, so separate instances on the same path
/// see each other's writes. Mutations rewrite the whole map: temp file,
/// fsync, rename. Concurrent writers from different processes can still lose
/// updates; callers serialize them.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

/// Current file contents. Missing is empty; unreadable or corrupt is `None`.
fn read_values(path: &Path) -> Option<BTreeMap<String, String>> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(values) => Some(values),
            Err(e) => {
                tracing::warn!("Discarding corrupt settings file {:?}: {}", path, e);
                None
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Some(BTreeMap::new()),
        Err(e) => {
            tracing::warn!("Unable to read settings file {:?}: {}", path, e);
            None
        }
    }
}

impl FileKeyValueStore {
    /// Open the store at `path`. A missing file is an empty store; an
    /// unreadable one is logged and also treated as empty.
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            values: Mutex::new(read_values(path).unwrap_or_default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock the cache and refresh it from disk. The last good contents are
    /// kept when the file cannot be read.
    fn refreshed(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        let mut values = lock(&self.values);
        if let Some(current) = read_values(&self.path) {
            *values = current;
        }
        values
    }

    fn commit(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(values)?;
        let temp_path = self.path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Option<String> {
        self.refreshed().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.refreshed();
        let mut next = values.clone();
        next.insert(key.to_string(), value.to_string());
        self.commit(&next)?;
        *values = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.refreshed();
        if !values.contains_key(key) {
            return Ok(());
        }
        let mut next = values.clone();
        next.remove(key);
        self.commit(&next)?;
        *values = next;
        Ok(())
    }
}
