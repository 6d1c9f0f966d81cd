//! NVS persistence for WiFi credentials.
//!
//! This module stores the credential keys in ESP32's Non-Volatile Storage
//! (NVS) so they persist across reboots. `EspNvs` commits on every write, so
//! [`KeyValueStorage::commit`] has nothing left to do.

use super::{KeyValueStorage, StorageError};
use crate::config::MAX_PASSPHRASE_LEN;
use esp_idf_svc::nvs::{EspNvs, NvsDefault};
use esp_idf_sys::EspError;

/// Read buffer for one value: the longest field plus its NUL terminator.
const MAX_VALUE_BUFFER_SIZE: usize = MAX_PASSPHRASE_LEN + 1;

/// NVS-backed implementation of [`KeyValueStorage`].
pub struct NvsStorage {
    nvs: EspNvs<NvsDefault>,
}

impl NvsStorage {
    /// Open `namespace` on the default NVS partition, creating it if needed.
    pub fn open(namespace: &str) -> Result<Self, EspError> {
        let partition = crate::get_nvs_default_partition()?;
        let nvs = EspNvs::new(partition, namespace, true)?;
        Ok(Self { nvs })
    }
}

impl KeyValueStorage for NvsStorage {
    fn get_str(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut buf = [0u8; MAX_VALUE_BUFFER_SIZE];
        match self.nvs.get_str(key, &mut buf) {
            Ok(value) => Ok(value.map(str::to_string)),
            Err(e) => {
                log::warn!("Failed to read '{}' from NVS: {:?}", key, e);
                Err(e.into())
            }
        }
    }

    fn set_str(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.nvs.set_str(key, value)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        // Returns false when the key was not present, which is fine
        self.nvs.remove(key)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use crate::storage::{CredentialStore, StoreError, NAMESPACE};
    use wifi_provisioning_esp32_macros::tap_test;

    #[tap_test]
    fn nvs_open_namespace() {
        let storage = NvsStorage::open(NAMESPACE);
        assert!(storage.is_ok(), "Failed to open NVS: {:?}", storage.err());
    }

    #[tap_test]
    fn nvs_credential_roundtrip() {
        let store = CredentialStore::new(NvsStorage::open(NAMESPACE).expect("open NVS"));
        store.set("lab-iot", "IoT-IoT-IoT").expect("save credential");

        let credential = store.get().expect("load credential");
        assert_eq!(credential.ssid(), "lab-iot");
        assert_eq!(credential.passphrase(), "IoT-IoT-IoT");

        store.clear().expect("clear credential");
    }

    #[tap_test]
    fn nvs_clear_twice() {
        let store = CredentialStore::new(NvsStorage::open(NAMESPACE).expect("open NVS"));
        store.clear().expect("first clear");
        store.clear().expect("second clear");
        assert_eq!(store.get(), Err(StoreError::NotFound));
    }
}
