//! Provisioning firmware entry point.
//!
//! On ESP32 this drives the real radio, NVS and reset button, and restarts
//! the chip whenever the controller asks for it.
//!
//! On the host the radio is simulated and credentials live in
//! `~/.wifi-provisioning-esp32/storage.json`. A restart re-opens the store
//! and starts again from Init. Simulated networks come from
//! `PROV_SIM_NETWORKS` (`ssid:passphrase,...`); stdin accepts commands to
//! drive the button and the link:
//!
//! ```text
//! press     hold the reset button
//! release   release it
//! reset     hold it past the long-press threshold, then release
//! drop      drop the station link
//! ```

#[cfg(feature = "esp32")]
fn main() {
    use log::{error, info};

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    match run() {
        Ok(reason) => info!("Restarting ({:?})", reason),
        Err(e) => {
            error!("Provisioning failed: {}", e);
            // Avoid a tight restart loop on persistent failures
            std::thread::sleep(std::time::Duration::from_secs(5));
        }
    }

    esp_idf_hal::reset::restart();
}

#[cfg(feature = "esp32")]
fn run() -> Result<wifi_provisioning_esp32::RestartReason, Box<dyn std::error::Error>> {
    use esp_idf_hal::gpio::AnyIOPin;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use wifi_provisioning_esp32::button::EspButton;
    use wifi_provisioning_esp32::storage::{NvsStorage, NAMESPACE};
    use wifi_provisioning_esp32::wifi::EspRadio;
    use wifi_provisioning_esp32::{CredentialStore, ModeController, ProvisioningConfig};

    let config = ProvisioningConfig::from_env()?;

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = wifi_provisioning_esp32::get_nvs_default_partition()?;

    let radio = EspRadio::new(peripherals.modem, sysloop, Some(nvs))?;
    // SAFETY: the button GPIO is not used by any other driver
    let button_pin = unsafe { AnyIOPin::new(config.button_gpio) };
    let button = EspButton::new(button_pin)?;
    let store = CredentialStore::new(NvsStorage::open(NAMESPACE)?);

    let reason = ModeController::new(config, store, radio)
        .with_button(button)
        .run()?;
    Ok(reason)
}

#[cfg(not(feature = "esp32"))]
fn main() {
    use log::{error, info, warn};
    use std::io::BufRead;
    use std::time::Duration;
    use wifi_provisioning_esp32::button::SharedButton;
    use wifi_provisioning_esp32::storage::{FileStorage, NAMESPACE};
    use wifi_provisioning_esp32::wifi::{SimulatedNetwork, SimulatedRadio};
    use wifi_provisioning_esp32::{CredentialStore, ModeController, ProvisioningConfig};

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match ProvisioningConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let networks = std::env::var("PROV_SIM_NETWORKS")
        .unwrap_or_else(|_| "lab-iot:IoT-IoT-IoT,Guest:guest-pass".to_string());
    let mut radio = SimulatedRadio::new(SimulatedNetwork::parse_list(&networks));
    let link = radio.handle();
    let button = SharedButton::new();

    {
        let button = button.clone();
        let hold = config.long_press + Duration::from_millis(200);
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match line.trim() {
                    "press" => button.press(),
                    "release" => button.release(),
                    "reset" => {
                        button.press();
                        std::thread::sleep(hold);
                        button.release();
                    }
                    "drop" => link.drop_link(),
                    "" => {}
                    other => warn!("Unknown command '{}' (press, release, reset, drop)", other),
                }
            }
        });
    }

    loop {
        // Re-open on every pass, as a reboot would
        let storage = match FileStorage::open_default(NAMESPACE) {
            Ok(storage) => storage,
            Err(e) => {
                error!("Failed to open credential store: {}", e);
                std::process::exit(1);
            }
        };
        let store = CredentialStore::new(storage);

        let controller =
            ModeController::new(config.clone(), store, &mut radio).with_button(button.clone());

        match controller.run() {
            Ok(reason) => info!("Restart requested ({:?}), starting over", reason),
            Err(e) => {
                error!("Provisioning failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}
