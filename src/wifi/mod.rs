//! WiFi radio abstraction, scanning and station connection.
//!
//! The controller talks to the radio only through the traits in this module,
//! so the same provisioning logic runs against the ESP-IDF driver on the
//! device and against [`SimulatedRadio`] on the host.
//!
//! # Components
//!
//! - [`scanner`] - one-shot access point scan ([`NetworkScanner`])
//! - [`station`] - bounded-retry station join ([`StationConnector`])
//! - [`simulated`] - in-process radio for host runs and tests
//! - `esp` - ESP-IDF driver wrapper (ESP32 only)

use crate::config::{AccessPointConfig, Credential, MdnsConfig};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

pub mod scanner;
pub mod simulated;
pub mod station;

#[cfg(feature = "esp32")]
mod esp;

pub use scanner::{NetworkScanner, ScanResult};
pub use simulated::{SimulatedNetwork, SimulatedRadio, SimulatedRadioHandle};
pub use station::{
    AttemptOutcome, ConnectOutcome, ConnectionAttempt, LinkStatus, RetryDecision,
    StationConnector,
};

#[cfg(feature = "esp32")]
pub use esp::EspRadio;

/// Events reported by the station interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationEvent {
    /// Station interface is up and ready to join.
    Started,
    /// Association was lost or a join attempt failed.
    Disconnected,
    /// DHCP assigned an address.
    GotIp(Ipv4Addr),
}

/// A radio that can list nearby access points.
pub trait ApScanner {
    /// Run one blocking scan pass and return SSIDs in driver order.
    fn scan_ssids(&mut self) -> Result<Vec<String>, RadioError>;
}

/// A radio that can act as a WiFi station.
pub trait StationLink {
    /// Configure station mode for `credential` and start the interface.
    ///
    /// The interface reports [`StationEvent::Started`] once it is ready.
    fn begin(&mut self, credential: &Credential) -> Result<(), RadioError>;

    /// Issue one join request. The outcome arrives as an event.
    fn join(&mut self) -> Result<(), RadioError>;

    /// Wait up to `timeout` for the next event. `Ok(None)` on timeout.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<StationEvent>, RadioError>;
}

/// A radio that can host the provisioning access point.
pub trait SoftAccessPoint {
    /// Bring up the softAP and return the portal's address on it.
    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<Ipv4Addr, RadioError>;

    /// Advertise the portal on the local network. Optional.
    fn advertise_portal(&mut self, _mdns: &MdnsConfig, _port: u16) -> Result<(), RadioError> {
        Ok(())
    }
}

/// Everything the provisioning controller needs from the radio.
pub trait WifiRadio: ApScanner + StationLink + SoftAccessPoint {}

impl<T: ApScanner + StationLink + SoftAccessPoint> WifiRadio for T {}

impl<T: ApScanner + ?Sized> ApScanner for &mut T {
    fn scan_ssids(&mut self) -> Result<Vec<String>, RadioError> {
        (**self).scan_ssids()
    }
}

impl<T: StationLink + ?Sized> StationLink for &mut T {
    fn begin(&mut self, credential: &Credential) -> Result<(), RadioError> {
        (**self).begin(credential)
    }

    fn join(&mut self) -> Result<(), RadioError> {
        (**self).join()
    }

    fn next_event(&mut self, timeout: Duration) -> Result<Option<StationEvent>, RadioError> {
        (**self).next_event(timeout)
    }
}

impl<T: SoftAccessPoint + ?Sized> SoftAccessPoint for &mut T {
    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<Ipv4Addr, RadioError> {
        (**self).start_access_point(config)
    }

    fn advertise_portal(&mut self, mdns: &MdnsConfig, port: u16) -> Result<(), RadioError> {
        (**self).advertise_portal(mdns, port)
    }
}

/// Errors from the radio driver (the `RadioError` class).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// The radio could not be initialized or started.
    Init(String),
    /// A scan pass failed.
    Scan(String),
    /// SSID rejected by the driver (too long or invalid characters).
    InvalidSsid,
    /// Passphrase rejected by the driver.
    InvalidPassword,
    /// Any other driver failure.
    Driver(String),
    /// The driver's event source went away.
    EventsClosed,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init(msg) => write!(f, "radio init failed: {}", msg),
            Self::Scan(msg) => write!(f, "scan failed: {}", msg),
            Self::InvalidSsid => write!(f, "invalid SSID"),
            Self::InvalidPassword => write!(f, "invalid password"),
            Self::Driver(msg) => write!(f, "driver error: {}", msg),
            Self::EventsClosed => write!(f, "radio event channel closed"),
        }
    }
}

impl std::error::Error for RadioError {}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for RadioError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Driver(format!("ESP error: {:?}", e))
    }
}
