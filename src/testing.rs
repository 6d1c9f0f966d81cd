//! TAP (Test Anything Protocol) harness for on-device tests.
//!
//! Unit tests under `cargo test` cannot run on the ESP32, so hardware-facing
//! code (NVS, GPIO, the WiFi driver) is checked by a separate firmware image
//! that prints TAP over the serial console. The same image builds for the
//! host, where it exercises the harness and the portable modules.
//!
//! Only compiled with the `tap-tests` feature so test code never ends up in
//! the provisioning firmware.
//!
//! # Usage
//!
//! ```ignore
//! #[cfg(feature = "tap-tests")]
//! mod tap_tests {
//!     use super::*;
//!     use wifi_provisioning_esp32_macros::tap_test;
//!
//!     #[tap_test]
//!     fn nvs_clear_twice() {
//!         let store = CredentialStore::new(NvsStorage::open(NAMESPACE).unwrap());
//!         store.clear().unwrap();
//!         store.clear().unwrap();
//!     }
//! }
//! ```
//!
//! `src/bin/device-tests.rs` runs everything registered this way.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

// Re-exported so the generated registration code resolves without a direct
// dependency on inventory in the calling crate
pub use inventory;

/// Result type for fallible test functions.
pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Registration callback generated by `#[tap_test]`.
pub type TestRegisterFn = fn(&mut TestRunner);

/// One registered test.
pub struct TapTestEntry {
    pub name: &'static str,
    pub register: TestRegisterFn,
}

impl TapTestEntry {
    pub const fn new(name: &'static str, register: TestRegisterFn) -> Self {
        Self { name, register }
    }
}

inventory::collect!(TapTestEntry);

/// Number of registered tests.
pub fn test_count() -> usize {
    inventory::iter::<TapTestEntry>.into_iter().count()
}

/// Run every registered test. Returns true if all passed.
pub fn run_all_tests() -> bool {
    let mut runner = TestRunner::new();
    runner.print_header(test_count());

    for entry in inventory::iter::<TapTestEntry> {
        (entry.register)(&mut runner);
    }

    runner.finish()
}

/// How a single test ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Pass,
    Fail(String),
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs tests and prints one TAP line per test.
#[derive(Debug, Default)]
pub struct TestRunner {
    tests_run: usize,
    tests_passed: usize,
}

impl TestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, name: &str, outcome: Outcome) {
        self.tests_run += 1;
        match outcome {
            Outcome::Pass => {
                self.tests_passed += 1;
                println!("ok {} - {}", self.tests_run, name);
            }
            Outcome::Fail(reason) => {
                println!("not ok {} - {}", self.tests_run, name);
                println!("# {}", reason);
            }
        }
    }

    /// Run a fallible test. `Err` and panics both count as failures.
    pub fn run<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() -> TestResult,
    {
        let outcome = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(Ok(())) => Outcome::Pass,
            Ok(Err(e)) => Outcome::Fail(format!("Error: {}", e)),
            Err(payload) => Outcome::Fail(format!("Panic: {}", panic_message(&*payload))),
        };
        self.record(name, outcome);
    }

    /// Run a test that signals failure by panicking.
    pub fn run_assert<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce(),
    {
        self.run(name, || {
            test_fn();
            Ok(())
        });
    }

    /// Run a test that must panic, optionally with a message containing
    /// `expected`.
    pub fn run_should_panic<F>(&mut self, name: &str, test_fn: F, expected: Option<&str>)
    where
        F: FnOnce(),
    {
        let outcome = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(()) => Outcome::Fail("Expected panic but test completed normally".to_string()),
            Err(payload) => {
                let msg = panic_message(&*payload);
                match expected {
                    Some(expected) if !msg.contains(expected) => Outcome::Fail(format!(
                        "Expected panic containing '{}', got '{}'",
                        expected, msg
                    )),
                    _ => Outcome::Pass,
                }
            }
        };
        self.record(name, outcome);
    }

    pub fn print_header(&self, planned_tests: usize) {
        println!("TAP version 14");
        println!("1..{}", planned_tests);
    }

    /// Print a diagnostic line.
    pub fn comment(msg: &str) {
        println!("# {}", msg);
    }

    /// Print the summary. Returns true if nothing failed.
    pub fn finish(&self) -> bool {
        println!("# Tests run: {}", self.tests_run);
        println!("# Passed: {}", self.tests_passed);
        println!("# Failed: {}", self.tests_failed());

        let passed = self.tests_failed() == 0;
        println!("# Result: {}", if passed { "PASS" } else { "FAIL" });
        passed
    }

    pub fn tests_run(&self) -> usize {
        self.tests_run
    }

    pub fn tests_passed(&self) -> usize {
        self.tests_passed
    }

    pub fn tests_failed(&self) -> usize {
        self.tests_run - self.tests_passed
    }
}

mod tap_tests {
    use super::*;
    use wifi_provisioning_esp32_macros::tap_test;

    #[tap_test]
    fn runner_counts_pass_and_error() {
        let mut runner = TestRunner::new();
        runner.run("passes", || Ok(()));
        runner.run("errors", || Err("storage unavailable".into()));
        assert_eq!(runner.tests_run(), 2);
        assert_eq!(runner.tests_passed(), 1);
        assert_eq!(runner.tests_failed(), 1);
    }

    #[tap_test]
    fn runner_catches_panic() {
        let mut runner = TestRunner::new();
        runner.run_assert("panics", || panic!("intentional panic"));
        assert_eq!(runner.tests_failed(), 1);
    }

    #[tap_test]
    fn runner_checks_panic_message() {
        let mut runner = TestRunner::new();
        runner.run_should_panic("right message", || panic!("SSID too long"), Some("too long"));
        runner.run_should_panic("wrong message", || panic!("other"), Some("too long"));
        runner.run_should_panic("no panic", || {}, None);
        assert_eq!(runner.tests_passed(), 1);
        assert_eq!(runner.tests_failed(), 2);
    }
}
