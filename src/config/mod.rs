//! Firmware configuration.
//!
//! # Components
//!
//! - [`credential`] - WiFi credential pair and its validation rules
//! - [`settings`] - tunables (scan size, retries, long-press time, softAP)

mod credential;
mod settings;

pub use credential::{
    validate_passphrase, validate_ssid, Credential, CredentialError, MAX_PASSPHRASE_LEN,
    MAX_SSID_LEN,
};
pub use settings::{
    AccessPointConfig, ConfigError, FailurePolicy, MdnsConfig, ProvisioningConfig,
    DEFAULT_LONG_PRESS, DEFAULT_MAX_RETRIES, DEFAULT_PORTAL_PORT, DEFAULT_RECV_BUFFER_SIZE,
    DEFAULT_SCAN_LIST_SIZE,
};
