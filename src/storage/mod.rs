//! Persistent credential storage.
//!
//! [`CredentialStore`] keeps a single SSID/passphrase pair in a namespaced
//! key-value backend so it survives reboots. Backends:
//!
//! - [`MemoryStorage`] - in-process map (tests, host dry runs)
//! - [`FileStorage`] - JSON file per namespace (host only)
//! - [`NvsStorage`] - ESP-IDF NVS (ESP32 only)
//!
//! # Example
//!
//! ```
//! use wifi_provisioning_esp32::storage::{CredentialStore, MemoryStorage, StoreError};
//!
//! let store = CredentialStore::new(MemoryStorage::new());
//! assert!(matches!(store.get(), Err(StoreError::NotFound)));
//!
//! store.set("lab-iot", "IoT-IoT-IoT").unwrap();
//! assert_eq!(store.get().unwrap().ssid(), "lab-iot");
//!
//! store.clear().unwrap();
//! assert!(matches!(store.get(), Err(StoreError::NotFound)));
//! ```

use crate::config::{Credential, CredentialError};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use zeroize::Zeroizing;

mod memory;
pub use memory::MemoryStorage;

#[cfg(not(target_os = "espidf"))]
mod file;
#[cfg(not(target_os = "espidf"))]
pub use file::FileStorage;

#[cfg(feature = "esp32")]
mod nvs;
#[cfg(feature = "esp32")]
pub use nvs::NvsStorage;

/// Storage namespace for the credential keys.
pub const NAMESPACE: &str = "storage";

/// Key holding the SSID.
pub const SSID_KEY: &str = "ssid";

/// Key holding the passphrase.
pub const PASSWORD_KEY: &str = "password";

/// A namespaced string key-value store that survives power loss.
///
/// Writes may be staged until [`commit`](KeyValueStorage::commit); backends
/// that write through treat `commit` as a no-op.
pub trait KeyValueStorage: Send {
    /// Read a string value. `Ok(None)` if the key does not exist.
    fn get_str(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a string value.
    fn set_str(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;

    /// Make all pending writes durable.
    fn commit(&mut self) -> Result<(), StorageError>;
}

/// Persistent store for the device's single WiFi credential.
///
/// Cloning yields another handle to the same backend. All operations take
/// the backend lock for their whole duration, so a reader never observes a
/// half-written pair.
pub struct CredentialStore<S> {
    backend: Arc<Mutex<S>>,
}

impl<S> Clone for CredentialStore<S> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<S: KeyValueStorage> CredentialStore<S> {
    /// Wrap a storage backend.
    pub fn new(backend: S) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
        }
    }

    /// Read the stored credential.
    ///
    /// Fails with [`StoreError::NotFound`] if either key is missing. A stored
    /// pair that no longer passes validation is reported as corrupted.
    pub fn get(&self) -> Result<Credential, StoreError> {
        let backend = self.lock();
        read_pair(&*backend)
    }

    /// Check whether a credential is stored.
    pub fn is_configured(&self) -> bool {
        self.get().is_ok()
    }

    /// Validate and persist a credential pair.
    ///
    /// Both keys are committed together. If any write fails, the previous
    /// values are restored before the error is returned.
    pub fn set(&self, ssid: &str, passphrase: &str) -> Result<(), StoreError> {
        let credential = Credential::new(ssid, passphrase)?;
        self.store(&credential)
    }

    /// Persist an already validated credential.
    pub fn store(&self, credential: &Credential) -> Result<(), StoreError> {
        let mut backend = self.lock();

        let previous_ssid = backend.get_str(SSID_KEY)?;
        let previous_password = backend.get_str(PASSWORD_KEY)?.map(Zeroizing::new);
        let previous = (
            previous_ssid.as_deref(),
            previous_password.as_deref().map(String::as_str),
        );

        if let Err(e) = write_pair(&mut *backend, credential) {
            error!("Credential write failed: {}", e);
            rollback(&mut *backend, previous);
            return Err(e.into());
        }

        // Read back to catch silent flash write failures
        match read_pair(&*backend) {
            Ok(stored) if stored == *credential => {}
            Ok(_) => {
                error!("Credential verification failed - data mismatch after save");
                rollback(&mut *backend, previous);
                return Err(StorageError::Corrupted("read-back mismatch".into()).into());
            }
            Err(e) => {
                error!("Failed to read back credential after save: {}", e);
                rollback(&mut *backend, previous);
                return Err(match e {
                    StoreError::Storage(e) => e.into(),
                    _ => StorageError::Corrupted("credential missing after save".into()).into(),
                });
            }
        }

        info!("Credential for '{}' saved", credential.ssid());
        Ok(())
    }

    /// Remove the stored credential. Succeeds if nothing is stored.
    pub fn clear(&self) -> Result<(), StorageError> {
        let mut backend = self.lock();
        backend.remove(SSID_KEY)?;
        backend.remove(PASSWORD_KEY)?;
        backend.commit()?;
        warn!("Stored credential cleared");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, S> {
        // A panic while holding the lock cannot leave a half-written pair
        // visible: every write path either completes or rolls back.
        self.backend
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_pair<S: KeyValueStorage>(backend: &S) -> Result<Credential, StoreError> {
    let ssid = backend.get_str(SSID_KEY)?;
    let password = backend.get_str(PASSWORD_KEY)?;

    match (ssid, password) {
        (Some(ssid), Some(password)) => Credential::new(ssid, password).map_err(|e| {
            warn!("Stored credential is invalid: {}", e);
            StoreError::Storage(StorageError::Corrupted(e.to_string()))
        }),
        (None, None) => {
            debug!("No credential stored");
            Err(StoreError::NotFound)
        }
        _ => {
            warn!("Only one credential key present, treating as absent");
            Err(StoreError::NotFound)
        }
    }
}

fn write_pair<S: KeyValueStorage>(
    backend: &mut S,
    credential: &Credential,
) -> Result<(), StorageError> {
    backend.set_str(SSID_KEY, credential.ssid())?;
    backend.set_str(PASSWORD_KEY, credential.passphrase())?;
    backend.commit()
}

fn rollback<S: KeyValueStorage>(backend: &mut S, previous: (Option<&str>, Option<&str>)) {
    if let Err(e) = restore_pair(backend, previous) {
        error!("Credential rollback failed: {}", e);
    }
}

fn restore_pair<S: KeyValueStorage>(
    backend: &mut S,
    (ssid, password): (Option<&str>, Option<&str>),
) -> Result<(), StorageError> {
    for (key, value) in [(SSID_KEY, ssid), (PASSWORD_KEY, password)] {
        match value {
            Some(v) => backend.set_str(key, v)?,
            None => backend.remove(key)?,
        }
    }
    backend.commit()
}

/// Errors from the storage backend (the `StorageError` class).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend reported an I/O failure.
    Io(String),
    /// Stored data could not be decoded or failed verification.
    Corrupted(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "storage I/O error: {}", msg),
            Self::Corrupted(msg) => write!(f, "storage corrupted: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for StorageError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Io(format!("ESP error: {:?}", e))
    }
}

/// Errors from [`CredentialStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No credential is stored.
    NotFound,
    /// The credential failed validation; nothing was written.
    InvalidInput(CredentialError),
    /// The backend failed.
    Storage(StorageError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no credential stored"),
            Self::InvalidInput(e) => write!(f, "invalid credential: {}", e),
            Self::Storage(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidInput(e) => Some(e),
            Self::Storage(e) => Some(e),
            Self::NotFound => None,
        }
    }
}

impl From<CredentialError> for StoreError {
    fn from(e: CredentialError) -> Self {
        Self::InvalidInput(e)
    }
}

impl From<StorageError> for StoreError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}
