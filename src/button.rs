//! Long-press detection on the factory-reset button.
//!
//! A [`ButtonWatcher`] thread polls a [`ButtonInput`] and reports
//! [`ControllerEvent::LongPress`] once per press held past the threshold.
//! The gesture fires while the button is still held; releasing and pressing
//! again arms it anew.

use crate::controller::ControllerEvent;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Gestures recognized on the button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonGesture {
    LongPress,
}

/// Edge-free long-press detector driven by polled samples.
#[derive(Debug)]
pub struct LongPressDetector {
    threshold: Duration,
    pressed_since: Option<Instant>,
    fired: bool,
}

impl LongPressDetector {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            pressed_since: None,
            fired: false,
        }
    }

    /// Feed one sample taken at `now`.
    pub fn poll(&mut self, pressed: bool, now: Instant) -> Option<ButtonGesture> {
        if !pressed {
            self.pressed_since = None;
            self.fired = false;
            return None;
        }

        let since = *self.pressed_since.get_or_insert(now);
        if !self.fired && now.saturating_duration_since(since) >= self.threshold {
            self.fired = true;
            return Some(ButtonGesture::LongPress);
        }
        None
    }
}

/// A button that can be sampled.
pub trait ButtonInput {
    /// True while the button is held down.
    fn is_pressed(&mut self) -> bool;
}

impl<T: ButtonInput + ?Sized> ButtonInput for Box<T> {
    fn is_pressed(&mut self) -> bool {
        (**self).is_pressed()
    }
}

/// Button state shared between threads, for host runs and tests.
#[derive(Debug, Clone, Default)]
pub struct SharedButton {
    pressed: Arc<AtomicBool>,
}

impl SharedButton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self) {
        self.pressed.store(true, Ordering::Release);
    }

    pub fn release(&self) {
        self.pressed.store(false, Ordering::Release);
    }
}

impl ButtonInput for SharedButton {
    fn is_pressed(&mut self) -> bool {
        self.pressed.load(Ordering::Acquire)
    }
}

/// Background thread polling a button.
pub struct ButtonWatcher {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl ButtonWatcher {
    /// Poll `input` every `poll_interval` and send a long-press event for
    /// every press held at least `threshold`.
    pub fn spawn<I>(
        mut input: I,
        threshold: Duration,
        poll_interval: Duration,
        events: Sender<ControllerEvent>,
    ) -> Self
    where
        I: ButtonInput + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::spawn(move || {
            let mut detector = LongPressDetector::new(threshold);
            debug!("Button watcher started, threshold {:?}", threshold);

            while !shutdown_clone.load(Ordering::Acquire) {
                if detector.poll(input.is_pressed(), Instant::now()).is_some() {
                    info!("Long press detected");
                    if events.send(ControllerEvent::LongPress).is_err() {
                        break;
                    }
                }
                thread::sleep(poll_interval);
            }
        });

        Self {
            handle: Some(handle),
            shutdown,
        }
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ButtonWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "esp32")]
pub use esp::EspButton;

#[cfg(feature = "esp32")]
mod esp {
    use super::ButtonInput;
    use esp_idf_hal::gpio::{Input, InputPin, OutputPin, PinDriver, Pull};
    use esp_idf_hal::peripheral::Peripheral;
    use esp_idf_sys::EspError;

    /// Active-low push button with the internal pull-up enabled.
    pub struct EspButton<'d, P: InputPin + OutputPin> {
        pin: PinDriver<'d, P, Input>,
    }

    impl<'d, P: InputPin + OutputPin> EspButton<'d, P> {
        pub fn new(pin: impl Peripheral<P = P> + 'd) -> Result<Self, EspError> {
            let mut pin = PinDriver::input(pin)?;
            pin.set_pull(Pull::Up)?;
            Ok(Self { pin })
        }
    }

    impl<P: InputPin + OutputPin> ButtonInput for EspButton<'_, P> {
        fn is_pressed(&mut self) -> bool {
            self.pin.is_low()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    const THRESHOLD: Duration = Duration::from_millis(5000);

    #[test]
    fn test_fires_once_per_press() {
        let start = Instant::now();
        let mut detector = LongPressDetector::new(THRESHOLD);

        assert_eq!(detector.poll(true, start), None);
        assert_eq!(detector.poll(true, start + Duration::from_millis(4999)), None);
        assert_eq!(
            detector.poll(true, start + THRESHOLD),
            Some(ButtonGesture::LongPress)
        );
        assert_eq!(detector.poll(true, start + Duration::from_secs(10)), None);
        assert_eq!(detector.poll(true, start + Duration::from_secs(60)), None);
    }

    #[test]
    fn test_short_press_ignored() {
        let start = Instant::now();
        let mut detector = LongPressDetector::new(THRESHOLD);
        detector.poll(true, start);
        assert_eq!(detector.poll(false, start + Duration::from_secs(3)), None);
        // A new press restarts the clock
        assert_eq!(detector.poll(true, start + Duration::from_secs(4)), None);
        assert_eq!(detector.poll(true, start + Duration::from_secs(8)), None);
        assert_eq!(
            detector.poll(true, start + Duration::from_secs(9)),
            Some(ButtonGesture::LongPress)
        );
    }

    #[test]
    fn test_rearms_after_release() {
        let start = Instant::now();
        let mut detector = LongPressDetector::new(THRESHOLD);
        detector.poll(true, start);
        assert!(detector.poll(true, start + THRESHOLD).is_some());
        detector.poll(false, start + Duration::from_secs(6));
        detector.poll(true, start + Duration::from_secs(7));
        assert!(detector.poll(true, start + Duration::from_secs(12)).is_some());
    }

    #[test]
    fn test_watcher_reports_long_press() {
        let button = SharedButton::new();
        let (tx, rx) = mpsc::channel();
        let mut watcher = ButtonWatcher::spawn(
            button.clone(),
            Duration::from_millis(30),
            Duration::from_millis(5),
            tx,
        );

        button.press();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)),
            Ok(ControllerEvent::LongPress)
        );
        // Still held: no second event
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        watcher.stop();
    }
}
