//! Runtime configuration for the provisioning firmware.
//!
//! Defaults match the lab firmware this flow was built for. Each value can be
//! overridden through a `PROV_*` variable, read at runtime on the host and at
//! compile time on ESP32 (see [`ProvisioningConfig::from_env`]).

use std::fmt;
use std::time::Duration;

/// Default number of SSIDs kept from a scan.
pub const DEFAULT_SCAN_LIST_SIZE: usize = 16;

/// Default join retries before a connection attempt fails.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default hold time for the factory-reset gesture.
pub const DEFAULT_LONG_PRESS: Duration = Duration::from_millis(5000);

/// Default button GPIO (boot button on most dev boards, active low).
pub const DEFAULT_BUTTON_GPIO: i32 = 2;

/// Default size of the portal's POST receive buffer.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 1024;

/// Default portal port on the device.
#[cfg(feature = "esp32")]
pub const DEFAULT_PORTAL_PORT: u16 = 80;

/// Default portal port on the host (80 needs root).
#[cfg(not(feature = "esp32"))]
pub const DEFAULT_PORTAL_PORT: u16 = 8080;

/// Default access point SSID while provisioning.
pub const DEFAULT_AP_SSID: &str = "ESP32-Setup";

/// Default mDNS hostname while provisioning.
pub const DEFAULT_MDNS_HOSTNAME: &str = "setup-gorghe";

/// Default mDNS instance name while provisioning.
pub const DEFAULT_MDNS_INSTANCE: &str = "ESP32 Provisioning";

/// What the controller does when a station connection runs out of retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Bring up the softAP portal so new credentials can be entered.
    FallbackToProvisioning,
    /// Keep retrying the stored credentials, pausing between attempts.
    RetryForever,
}

impl std::str::FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fallback" | "provision" => Ok(Self::FallbackToProvisioning),
            "retry" => Ok(Self::RetryForever),
            _ => Err(ConfigError::InvalidValue {
                key: "PROV_FAILURE_POLICY",
                value: s.to_string(),
            }),
        }
    }
}

/// softAP settings used in provisioning mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointConfig {
    /// Network name the device advertises.
    pub ssid: String,
    /// WPA2 passphrase, empty for an open network.
    pub passphrase: String,
    /// WiFi channel.
    pub channel: u8,
    /// Maximum simultaneous stations.
    pub max_connections: u16,
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            ssid: DEFAULT_AP_SSID.to_string(),
            passphrase: String::new(),
            channel: 1,
            max_connections: 4,
        }
    }
}

/// Portal service advertisement settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdnsConfig {
    pub hostname: String,
    pub instance: String,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_MDNS_HOSTNAME.to_string(),
            instance: DEFAULT_MDNS_INSTANCE.to_string(),
        }
    }
}

/// Complete firmware configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    /// Maximum SSIDs shown on the portal page.
    pub scan_list_size: usize,
    /// Join retries per connection attempt.
    pub max_retries: u32,
    /// Behaviour once retries are exhausted.
    pub failure_policy: FailurePolicy,
    /// Pause between attempts under [`FailurePolicy::RetryForever`].
    pub retry_delay: Duration,
    /// How long to wait for a station event before counting a silent failure.
    pub connect_timeout: Duration,
    /// Hold time for the factory-reset gesture.
    pub long_press: Duration,
    /// Button sampling interval.
    pub button_poll: Duration,
    /// Button GPIO number (ESP32 only).
    pub button_gpio: i32,
    /// Portal TCP port.
    pub portal_port: u16,
    /// Portal POST receive buffer size; longer bodies are truncated.
    pub recv_buffer_size: usize,
    /// How long a portal POST body may take to arrive.
    pub body_timeout: Duration,
    /// softAP settings.
    pub access_point: AccessPointConfig,
    /// mDNS settings.
    pub mdns: MdnsConfig,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            scan_list_size: DEFAULT_SCAN_LIST_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            failure_policy: FailurePolicy::FallbackToProvisioning,
            retry_delay: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(30),
            long_press: DEFAULT_LONG_PRESS,
            button_poll: Duration::from_millis(20),
            button_gpio: DEFAULT_BUTTON_GPIO,
            portal_port: DEFAULT_PORTAL_PORT,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            body_timeout: Duration::from_secs(10),
            access_point: AccessPointConfig::default(),
            mdns: MdnsConfig::default(),
        }
    }
}

impl ProvisioningConfig {
    /// Build a configuration from `PROV_*` overrides.
    ///
    /// On ESP32 the values are baked in at compile time with `option_env!`;
    /// on the host they are read from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        #[cfg(feature = "esp32")]
        {
            Self::from_lookup(compile_time_var)
        }
        #[cfg(not(feature = "esp32"))]
        {
            Self::from_lookup(|key| std::env::var(key).ok())
        }
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("PROV_SCAN_LIST_SIZE") {
            config.scan_list_size = parse_number("PROV_SCAN_LIST_SIZE", &v)?;
            if config.scan_list_size == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "PROV_SCAN_LIST_SIZE",
                    value: v,
                });
            }
        }
        if let Some(v) = lookup("PROV_MAX_RETRIES") {
            config.max_retries = parse_number("PROV_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("PROV_FAILURE_POLICY") {
            config.failure_policy = v.parse()?;
        }
        if let Some(v) = lookup("PROV_RETRY_DELAY_MS") {
            config.retry_delay = Duration::from_millis(parse_number("PROV_RETRY_DELAY_MS", &v)?);
        }
        if let Some(v) = lookup("PROV_CONNECT_TIMEOUT_MS") {
            config.connect_timeout =
                Duration::from_millis(parse_number("PROV_CONNECT_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("PROV_LONG_PRESS_MS") {
            config.long_press = Duration::from_millis(parse_number("PROV_LONG_PRESS_MS", &v)?);
        }
        if let Some(v) = lookup("PROV_BUTTON_GPIO") {
            config.button_gpio = parse_number("PROV_BUTTON_GPIO", &v)?;
        }
        if let Some(v) = lookup("PROV_PORTAL_PORT") {
            config.portal_port = parse_number("PROV_PORTAL_PORT", &v)?;
        }
        if let Some(v) = lookup("PROV_RECV_BUFFER") {
            config.recv_buffer_size = parse_number("PROV_RECV_BUFFER", &v)?;
        }
        if let Some(v) = lookup("PROV_BODY_TIMEOUT_MS") {
            config.body_timeout =
                Duration::from_millis(parse_number("PROV_BODY_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("PROV_AP_SSID") {
            if v.is_empty() || v.len() > super::MAX_SSID_LEN {
                return Err(ConfigError::InvalidValue {
                    key: "PROV_AP_SSID",
                    value: v,
                });
            }
            config.access_point.ssid = v;
        }
        if let Some(v) = lookup("PROV_AP_PASSWORD") {
            // WPA2 needs at least 8 characters; empty means open
            if !v.is_empty() && (v.len() < 8 || v.len() > super::MAX_PASSPHRASE_LEN) {
                return Err(ConfigError::InvalidValue {
                    key: "PROV_AP_PASSWORD",
                    value: "****".to_string(),
                });
            }
            config.access_point.passphrase = v;
        }
        if let Some(v) = lookup("PROV_AP_CHANNEL") {
            config.access_point.channel = parse_number("PROV_AP_CHANNEL", &v)?;
        }
        if let Some(v) = lookup("PROV_MDNS_HOSTNAME") {
            config.mdns.hostname = v;
        }
        if let Some(v) = lookup("PROV_MDNS_INSTANCE") {
            config.mdns.instance = v;
        }

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

#[cfg(feature = "esp32")]
fn compile_time_var(key: &'static str) -> Option<String> {
    let value = match key {
        "PROV_SCAN_LIST_SIZE" => option_env!("PROV_SCAN_LIST_SIZE"),
        "PROV_MAX_RETRIES" => option_env!("PROV_MAX_RETRIES"),
        "PROV_FAILURE_POLICY" => option_env!("PROV_FAILURE_POLICY"),
        "PROV_RETRY_DELAY_MS" => option_env!("PROV_RETRY_DELAY_MS"),
        "PROV_CONNECT_TIMEOUT_MS" => option_env!("PROV_CONNECT_TIMEOUT_MS"),
        "PROV_LONG_PRESS_MS" => option_env!("PROV_LONG_PRESS_MS"),
        "PROV_BUTTON_GPIO" => option_env!("PROV_BUTTON_GPIO"),
        "PROV_PORTAL_PORT" => option_env!("PROV_PORTAL_PORT"),
        "PROV_RECV_BUFFER" => option_env!("PROV_RECV_BUFFER"),
        "PROV_BODY_TIMEOUT_MS" => option_env!("PROV_BODY_TIMEOUT_MS"),
        "PROV_AP_SSID" => option_env!("PROV_AP_SSID"),
        "PROV_AP_PASSWORD" => option_env!("PROV_AP_PASSWORD"),
        "PROV_AP_CHANNEL" => option_env!("PROV_AP_CHANNEL"),
        "PROV_MDNS_HOSTNAME" => option_env!("PROV_MDNS_HOSTNAME"),
        "PROV_MDNS_INSTANCE" => option_env!("PROV_MDNS_INSTANCE"),
        _ => None,
    };
    value.map(str::to_string)
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set to a value that could not be used.
    InvalidValue { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value } => {
                write!(f, "invalid value for {}: '{}'", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
