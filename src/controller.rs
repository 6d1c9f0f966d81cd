//! Top-level provisioning state machine.
//!
//! ```text
//!            credential stored            Connected
//!   Init ───────────────────────▶ Connecting ─────────▶ Running
//!    │                                │ Failed             │ link lost,
//!    │ none stored                    ▼                    │ retries spent
//!    └──────────────────────▶ Provisioning ◀───────────────┘
//! ```
//!
//! Leaving Provisioning (a credential was saved) or Running (long press)
//! ends [`ModeController::run`] with a [`RestartReason`]; the caller restarts
//! the device, which brings the controller back to Init.
//!
//! The portal and the button watcher run on their own threads and report to
//! the controller over a single channel of [`ControllerEvent`]s.

use crate::button::{ButtonInput, ButtonWatcher};
use crate::config::{Credential, FailurePolicy, ProvisioningConfig};
use crate::portal::{PortalLimits, PortalState, ProvisioningPortal};
use crate::storage::{CredentialStore, KeyValueStorage, StorageError, StoreError};
use crate::wifi::{
    ConnectOutcome, LinkStatus, NetworkScanner, RadioError, StationConnector, WifiRadio,
};
use log::{debug, error, info, warn};
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// How often the Running loop checks for events and link changes.
const RUNNING_POLL: Duration = Duration::from_millis(100);

/// Operating mode of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Init,
    Provisioning,
    Connecting,
    Running,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Provisioning => "provisioning",
            Self::Connecting => "connecting",
            Self::Running => "running",
        };
        f.write_str(name)
    }
}

/// Events delivered to the controller from other threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    /// The portal stored a new credential.
    CredentialsSaved,
    /// The reset button was held past the long-press threshold.
    LongPress,
}

/// Why [`ModeController::run`] asked for a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// A credential was submitted through the portal.
    CredentialsSaved,
    /// The stored credential was erased by a long press.
    FactoryReset,
}

/// Snapshot of the controller, readable from other threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerStatus {
    pub mode: Mode,
    pub portal_addr: Option<SocketAddr>,
    pub station_ip: Option<Ipv4Addr>,
}

/// Shared view of a running controller's [`ControllerStatus`].
#[derive(Debug, Clone)]
pub struct StatusHandle {
    inner: Arc<Mutex<ControllerStatus>>,
}

impl StatusHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ControllerStatus {
                mode: Mode::Init,
                portal_addr: None,
                station_ip: None,
            })),
        }
    }

    pub fn get(&self) -> ControllerStatus {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mode(&self) -> Mode {
        self.get().mode
    }

    pub fn portal_addr(&self) -> Option<SocketAddr> {
        self.get().portal_addr
    }

    pub fn station_ip(&self) -> Option<Ipv4Addr> {
        self.get().station_ip
    }

    fn update(&self, f: impl FnOnce(&mut ControllerStatus)) {
        f(&mut self.inner.lock().unwrap_or_else(|e| e.into_inner()));
    }
}

/// Errors that end a controller run.
#[derive(Debug)]
pub enum ProvisioningError {
    /// Credential storage failed.
    Storage(StorageError),
    /// The radio failed.
    Radio(RadioError),
    /// The portal could not be started, or its server stopped.
    Portal(io::Error),
}

impl fmt::Display for ProvisioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {}", e),
            Self::Radio(e) => write!(f, "radio error: {}", e),
            Self::Portal(e) => write!(f, "portal error: {}", e),
        }
    }
}

impl std::error::Error for ProvisioningError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Radio(e) => Some(e),
            Self::Portal(e) => Some(e),
        }
    }
}

impl From<StorageError> for ProvisioningError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<RadioError> for ProvisioningError {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

/// Drives the device from boot to a restart.
pub struct ModeController<S, R> {
    config: ProvisioningConfig,
    store: CredentialStore<S>,
    connector: StationConnector<R>,
    button: Option<Box<dyn ButtonInput + Send>>,
    watcher: Option<ButtonWatcher>,
    portal_bind: Option<IpAddr>,
    events_tx: Sender<ControllerEvent>,
    events_rx: Receiver<ControllerEvent>,
    status: StatusHandle,
}

impl<S, R> ModeController<S, R>
where
    S: KeyValueStorage + 'static,
    R: WifiRadio,
{
    pub fn new(config: ProvisioningConfig, store: CredentialStore<S>, radio: R) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        let connector = StationConnector::new(radio).with_event_timeout(config.connect_timeout);
        Self {
            config,
            store,
            connector,
            button: None,
            watcher: None,
            portal_bind: None,
            events_tx,
            events_rx,
            status: StatusHandle::new(),
        }
    }

    /// Watch `button` for the factory-reset gesture once Running.
    pub fn with_button<B>(mut self, button: B) -> Self
    where
        B: ButtonInput + Send + 'static,
    {
        self.button = Some(Box::new(button));
        self
    }

    /// Bind the portal to `ip` instead of every interface.
    pub fn with_portal_bind(mut self, ip: IpAddr) -> Self {
        self.portal_bind = Some(ip);
        self
    }

    /// Sender for injecting events, as the portal and button watcher do.
    pub fn event_sender(&self) -> Sender<ControllerEvent> {
        self.events_tx.clone()
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn mode(&self) -> Mode {
        self.status.mode()
    }

    fn enter(&self, mode: Mode) {
        info!("Mode: {}", mode);
        self.status.update(|s| s.mode = mode);
    }

    /// Run until the device needs a restart.
    pub fn run(mut self) -> Result<RestartReason, ProvisioningError> {
        let mut credential: Option<Credential> = None;
        let mut mode = Mode::Init;

        loop {
            self.enter(mode);
            mode = match mode {
                Mode::Init => match self.store.get() {
                    Ok(stored) => {
                        info!("Found credentials for SSID '{}'", stored.ssid());
                        credential = Some(stored);
                        Mode::Connecting
                    }
                    Err(StoreError::NotFound) => {
                        info!("No credentials stored, starting provisioning");
                        Mode::Provisioning
                    }
                    Err(e) => {
                        warn!("Failed to read credentials: {}", e);
                        Mode::Provisioning
                    }
                },
                Mode::Provisioning => return self.provision(),
                Mode::Connecting => match credential.as_ref() {
                    Some(target) => {
                        match self.connector.connect(target, self.config.max_retries)? {
                            ConnectOutcome::Connected(ip) => {
                                self.status.update(|s| s.station_ip = Some(ip));
                                Mode::Running
                            }
                            ConnectOutcome::Failed => self.after_failure(),
                        }
                    }
                    None => Mode::Provisioning,
                },
                Mode::Running => match self.run_station()? {
                    Some(reason) => return Ok(reason),
                    None => {
                        self.status.update(|s| s.station_ip = None);
                        self.after_failure()
                    }
                },
            };
        }
    }

    fn after_failure(&self) -> Mode {
        match self.config.failure_policy {
            FailurePolicy::FallbackToProvisioning => {
                warn!("Could not connect, falling back to provisioning");
                Mode::Provisioning
            }
            FailurePolicy::RetryForever => {
                warn!(
                    "Could not connect, retrying in {:?}",
                    self.config.retry_delay
                );
                thread::sleep(self.config.retry_delay);
                Mode::Connecting
            }
        }
    }

    /// Scan, bring up the softAP and portal, and wait for a credential.
    fn provision(&mut self) -> Result<RestartReason, ProvisioningError> {
        let networks =
            NetworkScanner::new(self.connector.link_mut()).scan(self.config.scan_list_size)?;

        let ap_ip = self
            .connector
            .link_mut()
            .start_access_point(&self.config.access_point)?;

        let port = self.config.portal_port;
        if let Err(e) = self
            .connector
            .link_mut()
            .advertise_portal(&self.config.mdns, port)
        {
            warn!("mDNS unavailable, portal reachable by IP only: {}", e);
        }

        let mut portal = ProvisioningPortal::start(
            self.portal_bind,
            port,
            &networks,
            self.store.clone(),
            self.events_tx.clone(),
            PortalLimits {
                recv_buffer: self.config.recv_buffer_size,
                body_timeout: self.config.body_timeout,
            },
        )
        .map_err(ProvisioningError::Portal)?;

        let portal_addr = portal.local_addr();
        self.status.update(|s| s.portal_addr = portal_addr);
        info!(
            "Connect to '{}' and open http://{}:{}/index.html",
            self.config.access_point.ssid,
            ap_ip,
            portal_addr.map_or(port, |a| a.port())
        );

        loop {
            match self.events_rx.recv_timeout(RUNNING_POLL) {
                Ok(ControllerEvent::CredentialsSaved) => {
                    portal.stop();
                    self.status.update(|s| s.portal_addr = None);
                    return Ok(RestartReason::CredentialsSaved);
                }
                Ok(ControllerEvent::LongPress) => {
                    debug!("Long press ignored while provisioning");
                }
                Err(_) if portal.state() == PortalState::Stopped => {
                    self.status.update(|s| s.portal_addr = None);
                    return Err(ProvisioningError::Portal(io::Error::new(
                        io::ErrorKind::Other,
                        "portal server stopped",
                    )));
                }
                Err(_) => {}
            }
        }
    }

    /// Keep the link up and watch for the reset gesture.
    ///
    /// Returns `None` once the link is lost for good.
    fn run_station(&mut self) -> Result<Option<RestartReason>, ProvisioningError> {
        if self.watcher.is_none() {
            if let Some(button) = self.button.take() {
                self.watcher = Some(ButtonWatcher::spawn(
                    button,
                    self.config.long_press,
                    self.config.button_poll,
                    self.events_tx.clone(),
                ));
            }
        }

        loop {
            match self.events_rx.recv_timeout(RUNNING_POLL) {
                Ok(ControllerEvent::LongPress) => {
                    if let Err(e) = self.store.clear() {
                        error!("Failed to erase credentials: {}", e);
                        return Err(e.into());
                    }
                    info!("Credentials erased. Restarting...");
                    return Ok(Some(RestartReason::FactoryReset));
                }
                Ok(ControllerEvent::CredentialsSaved) => {
                    debug!("Ignoring credential event while running");
                }
                // The controller holds a sender, so this is always a timeout
                Err(_) => {}
            }

            match self.connector.supervise(Duration::ZERO)? {
                LinkStatus::Up(_) | LinkStatus::Reconnecting => {}
                LinkStatus::Failed => return Ok(None),
            }
        }
    }
}
