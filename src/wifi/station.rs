//! Station-mode connection with a bounded retry budget.
//!
//! Every disconnect while joining spends one retry; once `max_retries` are
//! spent the attempt fails. Acquiring an address refills the budget, so an
//! outage after a successful join starts counting from zero again. There is
//! no backoff: the next join is issued as soon as the disconnect arrives.

use super::{RadioError, StationEvent, StationLink};
use crate::config::Credential;
use log::{debug, info, warn};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Default wait for a station event before a silent attempt counts as failed.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of [`StationConnector::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Joined and got an address.
    Connected(Ipv4Addr),
    /// Retry budget exhausted.
    Failed,
}

/// State of a [`ConnectionAttempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Pending,
    Connected(Ipv4Addr),
    Failed,
}

/// What to do after a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Issue another join.
    Retry,
    /// Budget spent, stop.
    GiveUp,
}

/// Link state reported by [`StationConnector::supervise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Associated with an address.
    Up(Ipv4Addr),
    /// Lost the link, retries in progress.
    Reconnecting,
    /// Retries exhausted or never connected.
    Failed,
}

/// Retry bookkeeping for one connection target.
#[derive(Debug)]
pub struct ConnectionAttempt {
    target: Credential,
    retries: u32,
    max_retries: u32,
    outcome: AttemptOutcome,
}

impl ConnectionAttempt {
    pub fn new(target: Credential, max_retries: u32) -> Self {
        Self {
            target,
            retries: 0,
            max_retries,
            outcome: AttemptOutcome::Pending,
        }
    }

    pub fn target(&self) -> &Credential {
        &self.target
    }

    /// Retries spent since the last address was acquired.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn outcome(&self) -> AttemptOutcome {
        self.outcome
    }

    /// Record a disconnect and decide whether to try again.
    pub fn on_disconnect(&mut self) -> RetryDecision {
        if self.outcome == AttemptOutcome::Failed {
            return RetryDecision::GiveUp;
        }
        if self.retries < self.max_retries {
            self.retries += 1;
            self.outcome = AttemptOutcome::Pending;
            RetryDecision::Retry
        } else {
            self.outcome = AttemptOutcome::Failed;
            RetryDecision::GiveUp
        }
    }

    /// Record an acquired address. Refills the retry budget.
    pub fn on_got_ip(&mut self, ip: Ipv4Addr) {
        self.retries = 0;
        self.outcome = AttemptOutcome::Connected(ip);
    }
}

/// Joins a network through a [`StationLink`] and keeps it up.
pub struct StationConnector<L> {
    link: L,
    event_timeout: Duration,
    attempt: Option<ConnectionAttempt>,
    /// When the outstanding re-join was issued by [`supervise`](Self::supervise).
    rejoined_at: Option<Instant>,
}

impl<L: StationLink> StationConnector<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            attempt: None,
            rejoined_at: None,
        }
    }

    /// Set how long to wait for a driver event while joining.
    pub fn with_event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = timeout;
        self
    }

    /// The underlying link, for operations outside station mode.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Current attempt, if any.
    pub fn attempt(&self) -> Option<&ConnectionAttempt> {
        self.attempt.as_ref()
    }

    /// Join the network described by `credential`.
    ///
    /// Blocks until an address is acquired or `max_retries` disconnects
    /// after the first join have been seen. A wait that produces no event
    /// within the event timeout counts as a disconnect. With
    /// `max_retries == 0` the first failure is final.
    pub fn connect(
        &mut self,
        credential: &Credential,
        max_retries: u32,
    ) -> Result<ConnectOutcome, RadioError> {
        info!("Connecting to WiFi: {}", credential.ssid());

        self.attempt = Some(ConnectionAttempt::new(credential.clone(), max_retries));
        self.rejoined_at = None;
        self.link.begin(credential)?;

        loop {
            let event = self.link.next_event(self.event_timeout)?;
            let Some(attempt) = self.attempt.as_mut() else {
                return Ok(ConnectOutcome::Failed);
            };

            match event {
                Some(StationEvent::Started) => {
                    debug!("Station started, joining");
                    self.link.join()?;
                }
                Some(StationEvent::GotIp(ip)) => {
                    attempt.on_got_ip(ip);
                    info!("Connected to {}, got ip: {}", credential.ssid(), ip);
                    return Ok(ConnectOutcome::Connected(ip));
                }
                Some(StationEvent::Disconnected) | None => {
                    if event.is_none() {
                        warn!("No station event within {:?}", self.event_timeout);
                    }
                    match attempt.on_disconnect() {
                        RetryDecision::Retry => {
                            info!(
                                "Retry to connect to the AP ({}/{})",
                                attempt.retries(),
                                max_retries
                            );
                            self.link.join()?;
                        }
                        RetryDecision::GiveUp => {
                            warn!(
                                "Failed to connect to SSID '{}' after {} retries",
                                credential.ssid(),
                                max_retries
                            );
                            self.attempt = None;
                            return Ok(ConnectOutcome::Failed);
                        }
                    }
                }
            }
        }
    }

    /// Handle at most one link event, waiting up to `timeout` for it.
    ///
    /// Call repeatedly after a successful [`connect`](Self::connect). Losing
    /// the link spends retries from a fresh budget, and a re-join that hears
    /// nothing back within the event timeout spends one as well.
    /// [`LinkStatus::Failed`] means the budget ran out and the attempt is over.
    pub fn supervise(&mut self, timeout: Duration) -> Result<LinkStatus, RadioError> {
        let Some(attempt) = self.attempt.as_mut() else {
            return Ok(LinkStatus::Failed);
        };

        match self.link.next_event(timeout)? {
            None => match attempt.outcome() {
                AttemptOutcome::Connected(ip) => Ok(LinkStatus::Up(ip)),
                AttemptOutcome::Failed => Ok(LinkStatus::Failed),
                AttemptOutcome::Pending => {
                    let silent = self
                        .rejoined_at
                        .is_some_and(|at| at.elapsed() >= self.event_timeout);
                    if silent {
                        warn!("No station event within {:?}", self.event_timeout);
                        self.link_lost()
                    } else {
                        Ok(LinkStatus::Reconnecting)
                    }
                }
            },
            Some(StationEvent::Started) => {
                self.link.join()?;
                self.rejoined_at = Some(Instant::now());
                Ok(LinkStatus::Reconnecting)
            }
            Some(StationEvent::GotIp(ip)) => {
                attempt.on_got_ip(ip);
                self.rejoined_at = None;
                info!("Link restored, got ip: {}", ip);
                Ok(LinkStatus::Up(ip))
            }
            Some(StationEvent::Disconnected) => self.link_lost(),
        }
    }

    fn link_lost(&mut self) -> Result<LinkStatus, RadioError> {
        let Some(attempt) = self.attempt.as_mut() else {
            return Ok(LinkStatus::Failed);
        };

        match attempt.on_disconnect() {
            RetryDecision::Retry => {
                info!("Link lost, retry {}", attempt.retries());
                self.link.join()?;
                self.rejoined_at = Some(Instant::now());
                Ok(LinkStatus::Reconnecting)
            }
            RetryDecision::GiveUp => {
                warn!("Link lost and retries exhausted");
                self.attempt = None;
                self.rejoined_at = None;
                Ok(LinkStatus::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wifi::{SimulatedNetwork, SimulatedRadio};
    use std::collections::VecDeque;
    use std::thread;

    fn lab_credential() -> Credential {
        Credential::new("lab-iot", "IoT-IoT-IoT").unwrap()
    }

    fn lab_radio() -> SimulatedRadio {
        SimulatedRadio::new(vec![SimulatedNetwork::new("lab-iot", "IoT-IoT-IoT")])
    }

    /// Link whose driver never reports anything.
    struct SilentLink {
        joins: u32,
    }

    impl StationLink for SilentLink {
        fn begin(&mut self, _credential: &Credential) -> Result<(), RadioError> {
            Ok(())
        }

        fn join(&mut self) -> Result<(), RadioError> {
            self.joins += 1;
            Ok(())
        }

        fn next_event(&mut self, _timeout: Duration) -> Result<Option<StationEvent>, RadioError> {
            Ok(None)
        }
    }

    /// Link that replays a fixed list of events, then goes quiet.
    struct ScriptedLink {
        events: VecDeque<StationEvent>,
        joins: u32,
    }

    impl StationLink for ScriptedLink {
        fn begin(&mut self, _credential: &Credential) -> Result<(), RadioError> {
            Ok(())
        }

        fn join(&mut self) -> Result<(), RadioError> {
            self.joins += 1;
            Ok(())
        }

        fn next_event(&mut self, _timeout: Duration) -> Result<Option<StationEvent>, RadioError> {
            Ok(self.events.pop_front())
        }
    }

    // ==================== ConnectionAttempt Tests ====================

    #[test]
    fn test_attempt_spends_budget_then_gives_up() {
        let mut attempt = ConnectionAttempt::new(lab_credential(), 2);
        assert_eq!(attempt.on_disconnect(), RetryDecision::Retry);
        assert_eq!(attempt.on_disconnect(), RetryDecision::Retry);
        assert_eq!(attempt.on_disconnect(), RetryDecision::GiveUp);
        assert_eq!(attempt.outcome(), AttemptOutcome::Failed);
        // Terminal
        assert_eq!(attempt.on_disconnect(), RetryDecision::GiveUp);
    }

    #[test]
    fn test_attempt_zero_budget() {
        let mut attempt = ConnectionAttempt::new(lab_credential(), 0);
        assert_eq!(attempt.on_disconnect(), RetryDecision::GiveUp);
        assert_eq!(attempt.retries(), 0);
    }

    #[test]
    fn test_got_ip_refills_budget() {
        let ip = Ipv4Addr::new(192, 168, 1, 100);
        let mut attempt = ConnectionAttempt::new(lab_credential(), 2);
        attempt.on_disconnect();
        attempt.on_disconnect();
        attempt.on_got_ip(ip);
        assert_eq!(attempt.retries(), 0);
        assert_eq!(attempt.outcome(), AttemptOutcome::Connected(ip));

        assert_eq!(attempt.on_disconnect(), RetryDecision::Retry);
        assert_eq!(attempt.on_disconnect(), RetryDecision::Retry);
        assert_eq!(attempt.on_disconnect(), RetryDecision::GiveUp);
    }

    // ==================== StationConnector Tests ====================

    #[test]
    fn test_connect_first_try() {
        let mut radio = lab_radio();
        let handle = radio.handle();
        let mut connector = StationConnector::new(&mut radio);

        let outcome = connector.connect(&lab_credential(), 5).unwrap();
        assert!(matches!(outcome, ConnectOutcome::Connected(_)));
        assert_eq!(connector.attempt().unwrap().retries(), 0);
        assert_eq!(handle.join_attempts(), 1);
    }

    #[test]
    fn test_unreachable_network_exhausts_retries() {
        let mut radio = lab_radio();
        let handle = radio.handle();
        let mut connector = StationConnector::new(&mut radio);

        let wrong = Credential::new("nowhere", "IoT-IoT-IoT").unwrap();
        let outcome = connector.connect(&wrong, 3).unwrap();
        assert_eq!(outcome, ConnectOutcome::Failed);
        // First join plus three retries
        assert_eq!(handle.join_attempts(), 4);
        assert!(connector.attempt().is_none());
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let mut radio = lab_radio();
        let mut connector = StationConnector::new(&mut radio);
        let wrong = Credential::new("lab-iot", "not-the-key").unwrap();
        assert_eq!(connector.connect(&wrong, 1).unwrap(), ConnectOutcome::Failed);
    }

    #[test]
    fn test_zero_retries_fails_without_retrying() {
        let mut radio = lab_radio();
        let handle = radio.handle();
        let mut connector = StationConnector::new(&mut radio);

        let wrong = Credential::new("nowhere", "IoT-IoT-IoT").unwrap();
        assert_eq!(connector.connect(&wrong, 0).unwrap(), ConnectOutcome::Failed);
        assert_eq!(handle.join_attempts(), 1);
    }

    #[test]
    fn test_silent_driver_counts_as_disconnects() {
        let mut link = SilentLink { joins: 0 };
        let mut connector =
            StationConnector::new(&mut link).with_event_timeout(Duration::from_millis(1));
        assert_eq!(
            connector.connect(&lab_credential(), 2).unwrap(),
            ConnectOutcome::Failed
        );
        drop(connector);
        // No Started event, so only the two retries issue joins
        assert_eq!(link.joins, 2);
    }

    #[test]
    fn test_begin_error_is_radio_error() {
        let mut radio = lab_radio();
        radio.handle().set_radio_failure(true);
        let mut connector = StationConnector::new(&mut radio);
        assert!(matches!(
            connector.connect(&lab_credential(), 5),
            Err(RadioError::Init(_))
        ));
    }

    #[test]
    fn test_supervise_without_connection_is_failed() {
        let mut radio = lab_radio();
        let mut connector = StationConnector::new(&mut radio);
        assert_eq!(
            connector.supervise(Duration::ZERO).unwrap(),
            LinkStatus::Failed
        );
    }

    #[test]
    fn test_supervise_reconnects_after_drop() {
        let mut radio = lab_radio();
        let handle = radio.handle();
        let mut connector = StationConnector::new(&mut radio);
        let ip = match connector.connect(&lab_credential(), 2).unwrap() {
            ConnectOutcome::Connected(ip) => ip,
            other => panic!("unexpected outcome {:?}", other),
        };

        assert_eq!(connector.supervise(Duration::ZERO).unwrap(), LinkStatus::Up(ip));

        handle.drop_link();
        assert_eq!(
            connector.supervise(Duration::ZERO).unwrap(),
            LinkStatus::Reconnecting
        );
        assert!(matches!(
            connector.supervise(Duration::ZERO).unwrap(),
            LinkStatus::Up(_)
        ));
        assert_eq!(connector.attempt().unwrap().retries(), 0);
    }

    #[test]
    fn test_supervise_fails_when_network_gone() {
        let mut radio = lab_radio();
        let handle = radio.handle();
        let mut connector = StationConnector::new(&mut radio);
        connector.connect(&lab_credential(), 2).unwrap();

        handle.remove_network("lab-iot");
        handle.drop_link();

        let mut statuses = Vec::new();
        loop {
            let status = connector.supervise(Duration::ZERO).unwrap();
            statuses.push(status);
            if status == LinkStatus::Failed {
                break;
            }
            assert!(statuses.len() < 10, "supervise never gave up");
        }
        // Fresh budget of two retries, then failure
        assert_eq!(
            statuses,
            vec![
                LinkStatus::Reconnecting,
                LinkStatus::Reconnecting,
                LinkStatus::Failed
            ]
        );
    }

    #[test]
    fn test_supervise_silent_rejoin_spends_retries() {
        let ip = Ipv4Addr::new(192, 168, 1, 100);
        let mut link = ScriptedLink {
            events: VecDeque::from([
                StationEvent::Started,
                StationEvent::GotIp(ip),
                StationEvent::Disconnected,
            ]),
            joins: 0,
        };
        let mut connector =
            StationConnector::new(&mut link).with_event_timeout(Duration::from_millis(50));
        assert_eq!(
            connector.connect(&lab_credential(), 2).unwrap(),
            ConnectOutcome::Connected(ip)
        );

        // The drop spends the first retry
        assert_eq!(
            connector.supervise(Duration::ZERO).unwrap(),
            LinkStatus::Reconnecting
        );
        assert_eq!(connector.attempt().unwrap().retries(), 1);

        // Quiet, but still inside the event timeout
        assert_eq!(
            connector.supervise(Duration::ZERO).unwrap(),
            LinkStatus::Reconnecting
        );
        assert_eq!(connector.attempt().unwrap().retries(), 1);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(
            connector.supervise(Duration::ZERO).unwrap(),
            LinkStatus::Reconnecting
        );
        assert_eq!(connector.attempt().unwrap().retries(), 2);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(
            connector.supervise(Duration::ZERO).unwrap(),
            LinkStatus::Failed
        );
        assert!(connector.attempt().is_none());
        drop(connector);
        // Initial join plus the two re-joins
        assert_eq!(link.joins, 3);
    }
}
