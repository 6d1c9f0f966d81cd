//! Boot-to-restart flows against the simulated radio, with the credential
//! submitted through the portal over TCP.

use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use wifi_provisioning_esp32::button::SharedButton;
use wifi_provisioning_esp32::controller::StatusHandle;
use wifi_provisioning_esp32::storage::MemoryStorage;
use wifi_provisioning_esp32::wifi::{SimulatedNetwork, SimulatedRadio};
use wifi_provisioning_esp32::{
    CredentialStore, Mode, ModeController, ProvisioningConfig, RestartReason, StoreError,
};

fn config() -> ProvisioningConfig {
    ProvisioningConfig {
        portal_port: 0,
        max_retries: 3,
        long_press: Duration::from_millis(50),
        button_poll: Duration::from_millis(5),
        connect_timeout: Duration::from_millis(500),
        ..ProvisioningConfig::default()
    }
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

fn wait_for_portal(status: &StatusHandle) -> SocketAddr {
    wait_until("portal", || status.portal_addr().is_some());
    status.portal_addr().unwrap()
}

fn submit(addr: SocketAddr, body: &str) -> u16 {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    write!(
        stream,
        "POST /results.html HTTP/1.1\r\nHost: setup\r\nConnection: close\r\n\
         Content-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .unwrap();

    let mut raw = String::new();
    stream.read_to_string(&mut raw).unwrap();
    raw.split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap()
}

#[test]
fn test_provision_connect_and_factory_reset() {
    let mut radio = SimulatedRadio::new(vec![
        SimulatedNetwork::new("lab-iot", "IoT-IoT-IoT"),
        SimulatedNetwork::new("Guest", "guest-pass"),
    ]);
    let link = radio.handle();
    let store = CredentialStore::new(MemoryStorage::new());
    let button = SharedButton::new();

    // First boot: nothing stored, portal takes the credential
    {
        let controller = ModeController::new(config(), store.clone(), &mut radio)
            .with_portal_bind(IpAddr::from([127, 0, 0, 1]))
            .with_button(button.clone());
        let status = controller.status();

        thread::scope(|s| {
            let run = s.spawn(move || controller.run());
            let addr = wait_for_portal(&status);
            assert_eq!(status.mode(), Mode::Provisioning);
            assert_eq!(submit(addr, "ssid=lab-iot&ipass=IoT-IoT-IoT"), 200);
            assert_eq!(run.join().unwrap().unwrap(), RestartReason::CredentialsSaved);
        });
    }
    assert_eq!(link.scan_count(), 1);

    // Second boot: joins the stored network, long press wipes it
    {
        let controller =
            ModeController::new(config(), store.clone(), &mut radio).with_button(button.clone());
        let status = controller.status();

        thread::scope(|s| {
            let run = s.spawn(move || controller.run());
            wait_until("running", || status.mode() == Mode::Running);
            assert!(link.is_connected());

            button.press();
            assert_eq!(run.join().unwrap().unwrap(), RestartReason::FactoryReset);
            button.release();
        });
    }
    assert_eq!(store.get(), Err(StoreError::NotFound));
    assert_eq!(link.scan_count(), 1);
}

#[test]
fn test_wrong_key_returns_to_provisioning() {
    let mut radio = SimulatedRadio::new(vec![SimulatedNetwork::new("lab-iot", "IoT-IoT-IoT")]);
    let link = radio.handle();
    let store = CredentialStore::new(MemoryStorage::new());
    store.set("lab-iot", "wrong-key").unwrap();

    let controller = ModeController::new(config(), store.clone(), &mut radio)
        .with_portal_bind(IpAddr::from([127, 0, 0, 1]));
    let status = controller.status();

    thread::scope(|s| {
        let run = s.spawn(move || controller.run());
        let addr = wait_for_portal(&status);
        // One join plus three retries before giving up
        assert_eq!(link.join_attempts(), 4);

        assert_eq!(submit(addr, "ssid=lab-iot&ipass=IoT-IoT-IoT"), 200);
        assert_eq!(run.join().unwrap().unwrap(), RestartReason::CredentialsSaved);
    });

    assert_eq!(store.get().unwrap().passphrase(), "IoT-IoT-IoT");
}

#[test]
fn test_rejected_submission_keeps_portal_open() {
    let mut radio = SimulatedRadio::new(vec![SimulatedNetwork::new("lab-iot", "IoT-IoT-IoT")]);
    let store = CredentialStore::new(MemoryStorage::new());

    let controller = ModeController::new(config(), store.clone(), &mut radio)
        .with_portal_bind(IpAddr::from([127, 0, 0, 1]));
    let status = controller.status();

    thread::scope(|s| {
        let run = s.spawn(move || controller.run());
        let addr = wait_for_portal(&status);

        assert_eq!(submit(addr, "ssid=lab-iot"), 400);
        assert_eq!(status.mode(), Mode::Provisioning);
        assert!(!store.is_configured());

        assert_eq!(submit(addr, "ssid=lab-iot&ipass=IoT-IoT-IoT"), 200);
        assert_eq!(run.join().unwrap().unwrap(), RestartReason::CredentialsSaved);
    });
}
