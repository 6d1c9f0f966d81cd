//! ESP-IDF WiFi driver wrapper.
//!
//! Station joins are issued without blocking. Driver and IP events are
//! forwarded from the system event loop into a channel and read back through
//! [`StationLink::next_event`].

use super::{ApScanner, RadioError, SoftAccessPoint, StationEvent, StationLink};
use crate::config::{AccessPointConfig, Credential, MdnsConfig};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::mdns::EspMdns;
use esp_idf_svc::netif::IpEvent;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, BlockingWifi, ClientConfiguration, Configuration,
    EspWifi, WifiEvent,
};
use log::{debug, info, warn};
use std::net::Ipv4Addr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

/// Raw driver notifications. The address is looked up when the event is read.
#[derive(Debug, Clone, Copy)]
enum DriverEvent {
    StaStarted,
    StaDisconnected,
    GotIp,
}

/// WiFi radio backed by the ESP-IDF driver.
pub struct EspRadio {
    wifi: BlockingWifi<EspWifi<'static>>,
    events: Receiver<DriverEvent>,
    mdns: Option<EspMdns>,
    _wifi_subscription: EspSubscription<'static, System>,
    _ip_subscription: EspSubscription<'static, System>,
}

impl EspRadio {
    /// Take the modem and subscribe to station events.
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> Result<Self, RadioError> {
        let esp_wifi = EspWifi::new(modem, sysloop.clone(), nvs)
            .map_err(|e| RadioError::Init(format!("{:?}", e)))?;
        let wifi = BlockingWifi::wrap(esp_wifi, sysloop.clone())
            .map_err(|e| RadioError::Init(format!("{:?}", e)))?;

        let (tx, events) = mpsc::channel();

        let wifi_tx = tx.clone();
        let wifi_subscription = sysloop.subscribe::<WifiEvent, _>(move |event| {
            let forwarded = match event {
                WifiEvent::StaStarted => Some(DriverEvent::StaStarted),
                WifiEvent::StaDisconnected(..) => Some(DriverEvent::StaDisconnected),
                _ => None,
            };
            if let Some(event) = forwarded {
                let _ = wifi_tx.send(event);
            }
        })?;

        let ip_subscription = sysloop.subscribe::<IpEvent, _>(move |event| {
            if let IpEvent::DhcpIpAssigned(_) = event {
                let _ = tx.send(DriverEvent::GotIp);
            }
        })?;

        Ok(Self {
            wifi,
            events,
            mdns: None,
            _wifi_subscription: wifi_subscription,
            _ip_subscription: ip_subscription,
        })
    }

    fn stop_if_started(&mut self) -> Result<(), RadioError> {
        if self.wifi.is_started()? {
            self.wifi.stop()?;
        }
        Ok(())
    }

    fn station_ip(&self) -> Result<Ipv4Addr, RadioError> {
        let ip_info = self.wifi.wifi().sta_netif().get_ip_info()?;
        Ok(ip_info.ip)
    }
}

impl ApScanner for EspRadio {
    fn scan_ssids(&mut self) -> Result<Vec<String>, RadioError> {
        if !self.wifi.is_started()? {
            self.wifi
                .set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
            self.wifi
                .start()
                .map_err(|e| RadioError::Init(format!("{:?}", e)))?;
        }

        let found = self
            .wifi
            .scan()
            .map_err(|e| RadioError::Scan(format!("{:?}", e)))?;
        Ok(found.into_iter().map(|ap| ap.ssid.as_str().to_string()).collect())
    }
}

impl StationLink for EspRadio {
    fn begin(&mut self, credential: &Credential) -> Result<(), RadioError> {
        let auth_method = if credential.passphrase().is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        let config = Configuration::Client(ClientConfiguration {
            ssid: credential
                .ssid()
                .try_into()
                .map_err(|_| RadioError::InvalidSsid)?,
            password: credential
                .passphrase()
                .try_into()
                .map_err(|_| RadioError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        });

        self.stop_if_started()?;
        // Events from a previous session would confuse the retry count
        while self.events.try_recv().is_ok() {}

        self.wifi.set_configuration(&config)?;
        self.wifi
            .wifi_mut()
            .start()
            .map_err(|e| RadioError::Init(format!("{:?}", e)))?;
        info!("Station configured for SSID '{}'", credential.ssid());
        Ok(())
    }

    fn join(&mut self) -> Result<(), RadioError> {
        self.wifi.wifi_mut().connect()?;
        Ok(())
    }

    fn next_event(&mut self, timeout: Duration) -> Result<Option<StationEvent>, RadioError> {
        let event = match self.events.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => return Ok(None),
            Err(RecvTimeoutError::Disconnected) => return Err(RadioError::EventsClosed),
        };

        debug!("WiFi driver event: {:?}", event);
        Ok(Some(match event {
            DriverEvent::StaStarted => StationEvent::Started,
            DriverEvent::StaDisconnected => StationEvent::Disconnected,
            DriverEvent::GotIp => StationEvent::GotIp(self.station_ip()?),
        }))
    }
}

impl SoftAccessPoint for EspRadio {
    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<Ipv4Addr, RadioError> {
        let auth_method = if config.passphrase.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        let ap = AccessPointConfiguration {
            ssid: config
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| RadioError::InvalidSsid)?,
            password: config
                .passphrase
                .as_str()
                .try_into()
                .map_err(|_| RadioError::InvalidPassword)?,
            channel: config.channel,
            auth_method,
            max_connections: config.max_connections,
            ..Default::default()
        };

        self.stop_if_started()?;
        // Keep the station side enabled so scans still work
        self.wifi
            .set_configuration(&Configuration::Mixed(ClientConfiguration::default(), ap))?;
        self.wifi
            .start()
            .map_err(|e| RadioError::Init(format!("{:?}", e)))?;

        let ip = self.wifi.wifi().ap_netif().get_ip_info()?.ip;
        info!("softAP '{}' up, channel {}, ip {}", config.ssid, config.channel, ip);
        Ok(ip)
    }

    fn advertise_portal(&mut self, mdns: &MdnsConfig, port: u16) -> Result<(), RadioError> {
        if self.mdns.is_none() {
            self.mdns = Some(EspMdns::take()?);
        }
        let Some(responder) = self.mdns.as_mut() else {
            return Ok(());
        };

        responder.set_hostname(&mdns.hostname)?;
        responder.set_instance_name(&mdns.instance)?;
        if let Err(e) = responder.add_service(None, "_http", "_tcp", port, &[]) {
            warn!("Failed to register mDNS service: {:?}", e);
            return Err(e.into());
        }

        info!("mDNS hostname set to: [{}]", mdns.hostname);
        Ok(())
    }
}
