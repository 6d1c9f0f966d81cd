//! WiFi provisioning firmware library for ESP32.
//!
//! A device without stored credentials scans for networks, opens a softAP and
//! serves a form where a user picks a network and enters its key. The
//! credential is persisted and the device restarts into station mode. A long
//! press on the reset button erases the credential again.
//!
//! Everything except the ESP-IDF backends (behind the `esp32` feature) runs
//! and is tested on the host.

// Allow the crate to reference itself by name (needed for proc-macro generated code)
extern crate self as wifi_provisioning_esp32;

pub mod button;
pub mod config;
pub mod controller;
pub mod portal;
pub mod storage;
#[cfg(feature = "tap-tests")]
pub mod testing;
pub mod wifi;

// Re-export commonly used items
pub use config::{Credential, CredentialError, FailurePolicy, ProvisioningConfig};
pub use controller::{ControllerEvent, Mode, ModeController, ProvisioningError, RestartReason};
pub use portal::{PortalLimits, ProvisioningPortal};
pub use storage::{CredentialStore, KeyValueStorage, StorageError, StoreError};
pub use wifi::{NetworkScanner, RadioError, ScanResult, StationConnector};

// Re-export testing items (only with tap-tests feature)
#[cfg(feature = "tap-tests")]
pub use testing::TestRunner;

#[cfg(feature = "esp32")]
static NVS_PARTITION: std::sync::Mutex<Option<esp_idf_svc::nvs::EspDefaultNvsPartition>> =
    std::sync::Mutex::new(None);

/// The default NVS partition, taken on first use and shared afterwards.
///
/// `EspDefaultNvsPartition::take` succeeds only once per boot, but both the
/// WiFi driver and the credential store need the partition.
#[cfg(feature = "esp32")]
pub fn get_nvs_default_partition(
) -> Result<esp_idf_svc::nvs::EspDefaultNvsPartition, esp_idf_sys::EspError> {
    let mut slot = NVS_PARTITION.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(partition) = slot.as_ref() {
        return Ok(partition.clone());
    }
    let partition = esp_idf_svc::nvs::EspDefaultNvsPartition::take()?;
    *slot = Some(partition.clone());
    Ok(partition)
}
