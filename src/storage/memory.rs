//! In-memory key-value backend.
//!
//! Contents live as long as the process. Clones share the same map, which
//! lets a test keep a handle to inspect what a [`super::CredentialStore`]
//! wrote, and lets the host binary survive its simulated restarts.

use super::{KeyValueStorage, StorageError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shared in-memory map implementing [`KeyValueStorage`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// True if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_str(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set_str(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries().remove(key);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get_str("ssid").unwrap(), None);
    }

    #[test]
    fn test_remove_missing_key_ok() {
        let mut storage = MemoryStorage::new();
        assert!(storage.remove("ssid").is_ok());
    }

    #[test]
    fn test_clones_share_entries() {
        let mut storage = MemoryStorage::new();
        let view = storage.clone();
        storage.set_str("ssid", "lab-iot").unwrap();
        assert_eq!(view.get_str("ssid").unwrap().as_deref(), Some("lab-iot"));
        assert_eq!(view.len(), 1);
    }
}
