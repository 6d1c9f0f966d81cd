//! WiFi credential type.
//!
//! This module contains the platform-independent credential pair that the
//! portal produces, the store persists and the station connector consumes.
//!
//! # Example
//!
//! ```
//! use wifi_provisioning_esp32::config::Credential;
//!
//! let credential = Credential::new("lab-iot", "IoT-IoT-IoT").unwrap();
//! assert_eq!(credential.ssid(), "lab-iot");
//! assert!(Credential::new("", "secret").is_err());
//! ```

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum passphrase length for WPA2 (64 hex digits or a 63 char phrase).
pub const MAX_PASSPHRASE_LEN: usize = 64;

/// WiFi credentials for joining an access point.
///
/// Both fields are always non-empty and within their length limits; the only
/// way to build one is through [`Credential::new`]. The passphrase is wiped
/// from memory when the value is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    ssid: String,
    passphrase: String,
}

impl Credential {
    /// Create a validated credential pair.
    pub fn new(
        ssid: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let credential = Self {
            ssid: ssid.into(),
            passphrase: passphrase.into(),
        };
        credential.validate()?;
        Ok(credential)
    }

    /// Network name.
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// Network passphrase.
    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    fn validate(&self) -> Result<(), CredentialError> {
        validate_ssid(&self.ssid)?;
        validate_passphrase(&self.passphrase)
    }
}

// Never print the passphrase.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("ssid", &self.ssid)
            .field("passphrase", &"****")
            .finish()
    }
}

/// Check an SSID against the 1..=32 byte rule.
pub fn validate_ssid(ssid: &str) -> Result<(), CredentialError> {
    if ssid.is_empty() {
        return Err(CredentialError::SsidEmpty);
    }
    if ssid.len() > MAX_SSID_LEN {
        return Err(CredentialError::SsidTooLong {
            len: ssid.len(),
            max: MAX_SSID_LEN,
        });
    }
    Ok(())
}

/// Check a passphrase against the 1..=64 byte rule.
pub fn validate_passphrase(passphrase: &str) -> Result<(), CredentialError> {
    if passphrase.is_empty() {
        return Err(CredentialError::PassphraseEmpty);
    }
    if passphrase.len() > MAX_PASSPHRASE_LEN {
        return Err(CredentialError::PassphraseTooLong {
            len: passphrase.len(),
            max: MAX_PASSPHRASE_LEN,
        });
    }
    Ok(())
}

/// Credential validation errors (the `InvalidInput` class).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Passphrase is empty.
    PassphraseEmpty,
    /// Passphrase exceeds maximum length.
    PassphraseTooLong { len: usize, max: usize },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PassphraseEmpty => write!(f, "passphrase cannot be empty"),
            Self::PassphraseTooLong { len, max } => {
                write!(f, "passphrase too long: {} bytes (max {})", len, max)
            }
        }
    }
}

impl std::error::Error for CredentialError {}
