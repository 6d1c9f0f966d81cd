//! In-process radio for host builds and tests.
//!
//! Joins succeed when the target SSID and passphrase match a configured
//! network and fail with a disconnect otherwise. A [`SimulatedRadioHandle`]
//! lets another thread change reachability or drop the link while the
//! controller owns the radio.

use super::{ApScanner, RadioError, SoftAccessPoint, StationEvent, StationLink};
use crate::config::{AccessPointConfig, Credential, MdnsConfig};
use log::{debug, info};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Address handed out by the simulated DHCP server.
pub const SIMULATED_STATION_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 100);

/// Address of the simulated softAP.
pub const SIMULATED_AP_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

/// A network the simulated radio can see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedNetwork {
    pub ssid: String,
    pub passphrase: String,
}

impl SimulatedNetwork {
    pub fn new(ssid: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            passphrase: passphrase.into(),
        }
    }

    /// Parse `ssid:passphrase` entries separated by commas.
    ///
    /// Empty entries are skipped. An entry without `:` is an open network
    /// with an empty passphrase.
    pub fn parse_list(list: &str) -> Vec<Self> {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once(':') {
                Some((ssid, passphrase)) => Self::new(ssid, passphrase),
                None => Self::new(entry, ""),
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct SimState {
    networks: Vec<SimulatedNetwork>,
    events: VecDeque<StationEvent>,
    target: Option<(String, String)>,
    connected: bool,
    radio_failure: bool,
    join_attempts: u32,
    scan_count: u32,
    access_point: Option<AccessPointConfig>,
    advertised: Option<(String, u16)>,
}

/// Shared control surface for a [`SimulatedRadio`].
#[derive(Debug, Clone)]
pub struct SimulatedRadioHandle {
    shared: Arc<(Mutex<SimState>, Condvar)>,
}

impl SimulatedRadioHandle {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.shared.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push_event(&self, state: &mut SimState, event: StationEvent) {
        state.events.push_back(event);
        self.shared.1.notify_all();
    }

    /// Make `network` visible and joinable.
    pub fn add_network(&self, network: SimulatedNetwork) {
        self.state().networks.push(network);
    }

    /// Remove every network named `ssid`.
    pub fn remove_network(&self, ssid: &str) {
        self.state().networks.retain(|n| n.ssid != ssid);
    }

    /// Fail every radio operation while `failing` is set.
    pub fn set_radio_failure(&self, failing: bool) {
        self.state().radio_failure = failing;
    }

    /// Drop the current association as if the access point went away.
    pub fn drop_link(&self) {
        let mut state = self.state();
        if state.connected {
            state.connected = false;
            info!("Simulated link dropped");
            self.push_event(&mut state, StationEvent::Disconnected);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// Join requests issued so far.
    pub fn join_attempts(&self) -> u32 {
        self.state().join_attempts
    }

    /// Scan passes run so far.
    pub fn scan_count(&self) -> u32 {
        self.state().scan_count
    }

    /// Configuration of the running softAP, if one was started.
    pub fn access_point(&self) -> Option<AccessPointConfig> {
        self.state().access_point.clone()
    }

    /// Hostname and port last advertised over mDNS.
    pub fn advertised(&self) -> Option<(String, u16)> {
        self.state().advertised.clone()
    }
}

/// Radio that runs entirely in memory.
#[derive(Debug)]
pub struct SimulatedRadio {
    handle: SimulatedRadioHandle,
}

impl SimulatedRadio {
    pub fn new(networks: Vec<SimulatedNetwork>) -> Self {
        let state = SimState {
            networks,
            ..SimState::default()
        };
        Self {
            handle: SimulatedRadioHandle {
                shared: Arc::new((Mutex::new(state), Condvar::new())),
            },
        }
    }

    /// Control handle sharing this radio's state.
    pub fn handle(&self) -> SimulatedRadioHandle {
        self.handle.clone()
    }

    fn check_radio(state: &SimState) -> Result<(), RadioError> {
        if state.radio_failure {
            return Err(RadioError::Init("simulated radio failure".into()));
        }
        Ok(())
    }
}

impl ApScanner for SimulatedRadio {
    fn scan_ssids(&mut self) -> Result<Vec<String>, RadioError> {
        let mut state = self.handle.state();
        Self::check_radio(&state)?;
        state.scan_count += 1;
        Ok(state.networks.iter().map(|n| n.ssid.clone()).collect())
    }
}

impl StationLink for SimulatedRadio {
    fn begin(&mut self, credential: &Credential) -> Result<(), RadioError> {
        let mut state = self.handle.state();
        Self::check_radio(&state)?;
        state.target = Some((
            credential.ssid().to_string(),
            credential.passphrase().to_string(),
        ));
        state.connected = false;
        state.events.clear();
        self.handle.push_event(&mut state, StationEvent::Started);
        Ok(())
    }

    fn join(&mut self) -> Result<(), RadioError> {
        let mut state = self.handle.state();
        Self::check_radio(&state)?;
        state.join_attempts += 1;

        let reachable = match &state.target {
            Some((ssid, passphrase)) => state
                .networks
                .iter()
                .any(|n| &n.ssid == ssid && &n.passphrase == passphrase),
            None => false,
        };

        debug!("Simulated join #{} reachable={}", state.join_attempts, reachable);
        if reachable {
            state.connected = true;
            self.handle
                .push_event(&mut state, StationEvent::GotIp(SIMULATED_STATION_IP));
        } else {
            self.handle.push_event(&mut state, StationEvent::Disconnected);
        }
        Ok(())
    }

    fn next_event(&mut self, timeout: Duration) -> Result<Option<StationEvent>, RadioError> {
        let (lock, cvar) = &*self.handle.shared;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (mut state, _) = cvar
            .wait_timeout_while(guard, timeout, |s| s.events.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        Ok(state.events.pop_front())
    }
}

impl SoftAccessPoint for SimulatedRadio {
    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<Ipv4Addr, RadioError> {
        let mut state = self.handle.state();
        Self::check_radio(&state)?;
        info!("Simulated softAP '{}' up at {}", config.ssid, SIMULATED_AP_IP);
        state.access_point = Some(config.clone());
        Ok(SIMULATED_AP_IP)
    }

    fn advertise_portal(&mut self, mdns: &MdnsConfig, port: u16) -> Result<(), RadioError> {
        self.handle.state().advertised = Some((mdns.hostname.clone(), port));
        Ok(())
    }
}
