//! TAP test runner binary.
//!
//! Runs all tests registered with `#[tap_test]` and prints TAP output.
//!
//! # Usage
//!
//! ```bash
//! # Run on host
//! cargo run --bin device-tests --features tap-tests
//!
//! # Flash to hardware (NVS and GPIO tests included)
//! cargo espflash flash --bin device-tests --features esp32,tap-tests --release --monitor
//! ```

fn main() {
    #[cfg(feature = "esp32")]
    {
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
    }
    #[cfg(not(feature = "esp32"))]
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let success = wifi_provisioning_esp32::testing::run_all_tests();

    #[cfg(feature = "esp32")]
    {
        log::info!("Tests complete ({}). Halting.", if success { "pass" } else { "fail" });
        loop {
            std::thread::sleep(std::time::Duration::from_secs(1));
        }
    }

    #[cfg(not(feature = "esp32"))]
    std::process::exit(if success { 0 } else { 1 });
}
