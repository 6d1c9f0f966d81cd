//! File-backed key-value storage for host (development) builds.
//!
//! Each namespace is one JSON object in `<dir>/<namespace>.json`. Writes are
//! staged in memory and made durable by [`KeyValueStorage::commit`], which
//! writes a temporary file and renames it over the old one, so a crash leaves
//! either the old or the new contents on disk.
//!
//! Uses `~/.wifi-provisioning-esp32/` by default.

use super::{KeyValueStorage, StorageError};
use log::{debug, info};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Get the default storage directory.
///
/// Returns `~/.wifi-provisioning-esp32`
pub fn default_storage_dir() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home).join(".wifi-provisioning-esp32"))
}

/// JSON file implementing [`KeyValueStorage`] for one namespace.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStorage {
    /// Open (or prepare to create) `<dir>/<namespace>.json`.
    pub fn open(dir: &Path, namespace: &str) -> Result<Self, StorageError> {
        let path = dir.join(format!("{}.json", namespace));

        let entries = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| StorageError::Corrupted(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No storage file at {:?}, starting empty", path);
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, entries })
    }

    /// Open the namespace under [`default_storage_dir`].
    pub fn open_default(namespace: &str) -> Result<Self, StorageError> {
        let dir = default_storage_dir()?;
        Self::open(&dir, namespace)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStorage for FileStorage {
    fn get_str(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set_str(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| StorageError::Io(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;

        // Verify write by reading back
        let read_back = fs::read_to_string(&self.path)?;
        if read_back != json {
            return Err(StorageError::Corrupted(format!(
                "verification failed: wrote {} bytes, read {} bytes",
                json.len(),
                read_back.len()
            )));
        }

        info!("Storage committed to {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CredentialStore, StoreError, NAMESPACE};
    use std::env;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Counter to ensure unique test directories even in parallel execution
    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        env::temp_dir().join(format!("wifi-provisioning-test-{}-{}", pid, id))
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = unique_dir();
        let storage = FileStorage::open(&dir, NAMESPACE).unwrap();
        assert_eq!(storage.get_str("ssid").unwrap(), None);
    }

    #[test]
    fn test_credential_survives_reopen() {
        let dir = unique_dir();

        let store = CredentialStore::new(FileStorage::open(&dir, NAMESPACE).unwrap());
        store.set("lab-iot", "IoT-IoT-IoT").unwrap();
        drop(store);

        // Simulates a reboot
        let store = CredentialStore::new(FileStorage::open(&dir, NAMESPACE).unwrap());
        let credential = store.get().unwrap();
        assert_eq!(credential.ssid(), "lab-iot");
        assert_eq!(credential.passphrase(), "IoT-IoT-IoT");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_clear_survives_reopen() {
        let dir = unique_dir();

        let store = CredentialStore::new(FileStorage::open(&dir, NAMESPACE).unwrap());
        store.set("lab-iot", "IoT-IoT-IoT").unwrap();
        store.clear().unwrap();
        drop(store);

        let store = CredentialStore::new(FileStorage::open(&dir, NAMESPACE).unwrap());
        assert_eq!(store.get(), Err(StoreError::NotFound));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_uncommitted_writes_not_persisted() {
        let dir = unique_dir();

        let mut storage = FileStorage::open(&dir, NAMESPACE).unwrap();
        storage.set_str("ssid", "lab-iot").unwrap();
        drop(storage);

        let storage = FileStorage::open(&dir, NAMESPACE).unwrap();
        assert_eq!(storage.get_str("ssid").unwrap(), None);
    }

    #[test]
    fn test_corrupted_file_rejected() {
        let dir = unique_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("storage.json"), "not json").unwrap();

        let result = FileStorage::open(&dir, NAMESPACE);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));

        let _ = fs::remove_dir_all(&dir);
    }
}
