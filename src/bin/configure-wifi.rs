//! Seed the credential store without going through the portal.
//!
//! On ESP32 the credential is baked in at compile time:
//!   WIFI_SSID="MyNetwork" WIFI_PASSWORD="secret" cargo configure-wifi
//!
//! On the host it is read at runtime and written to the file store used by
//! the `provisioner` binary:
//!   WIFI_SSID="MyNetwork" WIFI_PASSWORD="secret" cargo run --bin configure-wifi
//!
//! `--clear` erases the stored credential instead.

use wifi_provisioning_esp32::config::{validate_passphrase, validate_ssid};
use wifi_provisioning_esp32::storage::{CredentialStore, KeyValueStorage, StoreError};

/// WiFi SSID - set via WIFI_SSID environment variable at compile time.
#[cfg(feature = "esp32")]
const WIFI_SSID: Option<&str> = option_env!("WIFI_SSID");

/// WiFi password - set via WIFI_PASSWORD environment variable at compile time.
#[cfg(feature = "esp32")]
const WIFI_PASSWORD: Option<&str> = option_env!("WIFI_PASSWORD");

/// Print error message and exit. The pause lets the serial console catch up.
fn halt_with_error(msg: &str) -> ! {
    eprintln!("\n{}", msg);
    eprintln!("\n=== Configuration failed ===\n");
    #[cfg(feature = "esp32")]
    std::thread::sleep(std::time::Duration::from_secs(2));
    std::process::exit(1);
}

fn configure<S: KeyValueStorage>(store: &CredentialStore<S>, ssid: &str, password: &str) {
    println!("SSID: {}", ssid);
    println!("Password: **** ({} chars)", password.len());

    if let Err(e) = validate_ssid(ssid).and_then(|()| validate_passphrase(password)) {
        halt_with_error(&format!("Error: {}", e));
    }

    match store.set(ssid, password) {
        Ok(()) => {
            println!("\n=== WiFi credentials saved ===");
            println!("\nThe provisioner will join this network on its next start.");
        }
        Err(StoreError::InvalidInput(e)) => halt_with_error(&format!("Error: {}", e)),
        Err(e) => halt_with_error(&format!("Error saving credentials: {}", e)),
    }
}

fn clear<S: KeyValueStorage>(store: &CredentialStore<S>) {
    match store.clear() {
        Ok(()) => println!("=== Stored credentials erased ==="),
        Err(e) => halt_with_error(&format!("Error erasing credentials: {}", e)),
    }
}

#[cfg(feature = "esp32")]
fn main() {
    use wifi_provisioning_esp32::storage::{NvsStorage, NAMESPACE};

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    println!("\n=== WiFi Configuration Utility ===\n");

    let nvs = match NvsStorage::open(NAMESPACE) {
        Ok(nvs) => nvs,
        Err(e) => halt_with_error(&format!("Error initializing NVS: {:?}", e)),
    };
    let store = CredentialStore::new(nvs);

    match WIFI_SSID {
        Some(ssid) if !ssid.is_empty() => configure(&store, ssid, WIFI_PASSWORD.unwrap_or("")),
        _ => {
            eprintln!("WIFI_SSID not set at compile time, erasing stored credentials");
            clear(&store);
        }
    }

    println!("\n=== Done - you can disconnect the device ===\n");
    std::thread::sleep(std::time::Duration::from_secs(2));
}

#[cfg(not(feature = "esp32"))]
fn main() {
    use wifi_provisioning_esp32::storage::{FileStorage, NAMESPACE};

    let storage = match FileStorage::open_default(NAMESPACE) {
        Ok(storage) => storage,
        Err(e) => halt_with_error(&format!("Error opening credential store: {}", e)),
    };
    println!("Credential store: {}", storage.path().display());
    let store = CredentialStore::new(storage);

    if std::env::args().any(|arg| arg == "--clear") {
        clear(&store);
        return;
    }

    let ssid = match std::env::var("WIFI_SSID") {
        Ok(ssid) if !ssid.is_empty() => ssid,
        _ => halt_with_error(
            "Error: WIFI_SSID not set.\n\n\
             Usage:\n  \
             WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" cargo run --bin configure-wifi",
        ),
    };
    let password = std::env::var("WIFI_PASSWORD").unwrap_or_default();

    configure(&store, &ssid, &password);
}
