//! Persistent key-value storage
//!
//! The session token lives in a single slot of a small key-value store. Reads may
//! come from anywhere; only the session manager writes.

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{ErrorContext, StoreError, StoreResult};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Synchronous put/get/remove contract over string values
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn put(&self, key: &str, value: &str) -> StoreResult<()>;

    fn remove(&self, key: &str) -> StoreResult<()>;
}

fn poisoned(component: &str, operation: &str) -> StoreError {
    StoreError::Storage {
        message: "storage lock poisoned".to_string(),
        source: None,
        context: ErrorContext::new(component).with_operation(operation),
    }
}

/// In-process store; contents vanish with the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| poisoned("memory_store", "get"))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| poisoned("memory_store", "put"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| poisoned("memory_store", "remove"))?;
        entries.remove(key);
        Ok(())
    }
}

/// Store backed by one JSON object on disk, rewritten on every change
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`.
    ///
    /// A missing, empty or unparsable file is an empty store: the user starts logged
    /// out and the next write replaces the file.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(|e| StoreError::Storage {
                message: format!("Failed to read {}: {}", path.display(), e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("file_store")
                    .with_operation("open")
                    .with_suggestion("Check that the storage file is readable"),
            })?;
            if data.trim().is_empty() {
                BTreeMap::new()
            } else {
                match serde_json::from_str(&data) {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "Ignoring corrupt storage file"
                        );
                        BTreeMap::new()
                    }
                }
            }
        } else {
            BTreeMap::new()
        };

        info!("File store opened at: {}", path.display());

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Written to a sibling temp file and renamed over the target, so a crash leaves
    // either the old or the new contents. Owner-only permissions on unix.
    fn flush(&self, entries: &BTreeMap<String, String>, operation: &str) -> StoreResult<()> {
        let write_error = |e: std::io::Error| StoreError::Storage {
            message: format!("Failed to write {}: {}", self.path.display(), e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("file_store")
                .with_operation(operation)
                .with_suggestion("Check that the storage directory is writable"),
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| StoreError::Storage {
            message: format!("Failed to create {}: {}", dir.display(), e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("file_store").with_operation(operation),
        })?;

        let json_data = serde_json::to_string_pretty(entries)?;
        let mut file = NamedTempFile::new_in(dir).map_err(write_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(write_error)?;
        }
        file.write_all(json_data.as_bytes()).map_err(write_error)?;
        file.as_file().sync_all().map_err(write_error)?;
        file.persist(&self.path).map_err(|e| write_error(e.error))?;

        debug!("Flushed {} entries to {}", entries.len(), self.path.display());
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| poisoned("file_store", "get"))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| poisoned("file_store", "put"))?;
        let mut updated = entries.clone();
        updated.insert(key.to_string(), value.to_string());
        // Memory only changes once the file write went through
        self.flush(&updated, "put")?;
        *entries = updated;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| poisoned("file_store", "remove"))?;
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut updated = entries.clone();
        updated.remove(key);
        self.flush(&updated, "remove")?;
        *entries = updated;
        Ok(())
    }
}

/// Open the store selected by the configuration
pub fn open_store(config: &StorageConfig) -> StoreResult<Arc<dyn KeyValueStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::File => Ok(Arc::new(FileStore::open(config.resolved_path()?)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_put_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("token").unwrap(), None);

        store.put("token", "T1").unwrap();
        assert_eq!(store.get("token").unwrap(), Some("T1".to_string()));

        store.put("token", "T2").unwrap();
        assert_eq!(store.get("token").unwrap(), Some("T2".to_string()));

        store.remove("token").unwrap();
        assert_eq!(store.get("token").unwrap(), None);

        // Removing an absent key is fine
        store.remove("token").unwrap();
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("token").unwrap(), None);
        store.put("token", "T1").unwrap();
        assert!(path.exists());

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("token").unwrap(), Some("T1".to_string()));

        reopened.remove("token").unwrap();
        let reopened_again = FileStore::open(&path).unwrap();
        assert_eq!(reopened_again.get("token").unwrap(), None);
    }

    #[test]
    fn test_file_store_recovers_from_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        // Truncated mid-write
        std::fs::write(&path, r#"{"token": "T1""#).unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("token").unwrap(), None);

        // Removing from the recovered store works, and the next write replaces the file
        store.remove("token").unwrap();
        store.put("token", "T2").unwrap();
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("token").unwrap(), Some("T2".to_string()));
    }

    #[test]
    fn test_open_store_with_corrupt_file_starts_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "not json").unwrap();

        let config = StorageConfig {
            backend: StorageBackend::File,
            token_path: path.to_string_lossy().into_owned(),
            ..Default::default()
        };
        let store = open_store(&config).unwrap();
        assert_eq!(store.get("token").unwrap(), None);
    }

    #[test]
    fn test_file_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");

        let store = FileStore::open(&path).unwrap();
        store.put("token", "T1").unwrap();
        store.put("token", "T2").unwrap();
        store.remove("token").unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("storage.json")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        // A pre-existing world-readable file is replaced too
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileStore::open(&path).unwrap();
        store.put("token", "SECRET").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_treats_empty_file_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("token").unwrap(), None);
    }

    #[test]
    fn test_open_store_memory_backend() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            ..Default::default()
        };
        let store = open_store(&config).unwrap();
        store.put("token", "abc").unwrap();
        assert_eq!(store.get("token").unwrap(), Some("abc".to_string()));
    }
}
