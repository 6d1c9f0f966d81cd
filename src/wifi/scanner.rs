//! One-shot access point scan.

use super::{ApScanner, RadioError};
use crate::config::MAX_SSID_LEN;
use log::info;

/// Ordered SSIDs from a single scan pass.
///
/// Entries keep the driver's order and duplicates. Each entry is at most
/// [`MAX_SSID_LEN`] bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    ssids: Vec<String>,
}

impl ScanResult {
    /// Build a result from driver output, keeping at most `max_results`.
    pub fn from_ssids<I>(ssids: I, max_results: usize) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let ssids = ssids
            .into_iter()
            .take(max_results)
            .map(|mut ssid| {
                truncate_to_char_boundary(&mut ssid, MAX_SSID_LEN);
                ssid
            })
            .collect();
        Self { ssids }
    }

    /// Empty result.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ssids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ssids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ssids.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.ssids
    }
}

fn truncate_to_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

/// Runs scan passes on a radio.
pub struct NetworkScanner<R> {
    radio: R,
}

impl<R: ApScanner> NetworkScanner<R> {
    pub fn new(radio: R) -> Self {
        Self { radio }
    }

    /// Scan once and return up to `max_results` SSIDs.
    ///
    /// Blocks until the driver finishes the pass. Extra access points are
    /// dropped silently.
    pub fn scan(&mut self, max_results: usize) -> Result<ScanResult, RadioError> {
        let seen = self.radio.scan_ssids()?;
        let total = seen.len();
        let result = ScanResult::from_ssids(seen, max_results);

        info!(
            "Total APs scanned = {}, kept {} (max {})",
            total,
            result.len(),
            max_results
        );
        for (i, ssid) in result.iter().enumerate() {
            info!("SSID {}: {}", i, ssid);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedScanner(Result<Vec<String>, RadioError>);

    impl ApScanner for FixedScanner {
        fn scan_ssids(&mut self) -> Result<Vec<String>, RadioError> {
            self.0.clone()
        }
    }

    fn ssids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_scan_keeps_driver_order_and_duplicates() {
        let mut scanner = NetworkScanner::new(FixedScanner(Ok(ssids(&[
            "lab-iot", "Guest", "lab-iot",
        ]))));
        let result = scanner.scan(16).unwrap();
        assert_eq!(result.as_slice(), &ssids(&["lab-iot", "Guest", "lab-iot"])[..]);
    }

    #[test]
    fn test_scan_truncates_silently() {
        let many: Vec<String> = (0..20).map(|i| format!("net-{}", i)).collect();
        let mut scanner = NetworkScanner::new(FixedScanner(Ok(many)));
        let result = scanner.scan(16).unwrap();
        assert_eq!(result.len(), 16);
        assert_eq!(result.iter().last(), Some("net-15"));
    }

    #[test]
    fn test_scan_nothing_visible() {
        let mut scanner = NetworkScanner::new(FixedScanner(Ok(Vec::new())));
        assert!(scanner.scan(16).unwrap().is_empty());
    }

    #[test]
    fn test_scan_radio_error() {
        let mut scanner = NetworkScanner::new(FixedScanner(Err(RadioError::Init(
            "wifi init".into(),
        ))));
        assert!(matches!(scanner.scan(16), Err(RadioError::Init(_))));
    }

    #[test]
    fn test_long_ssid_truncated_on_char_boundary() {
        // 31 ASCII bytes + a 3-byte char would be 34 bytes
        let ssid = format!("{}\u{20ac}", "a".repeat(31));
        let result = ScanResult::from_ssids(vec![ssid], 16);
        assert_eq!(result.as_slice()[0], "a".repeat(31));
    }
}
