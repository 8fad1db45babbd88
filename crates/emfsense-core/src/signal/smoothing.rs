//! Bounded per-frequency windows for continuous acquisition
//!
//! Each carrier frequency gets its own ring of recent magnitudes (for the
//! moving average applied before depth) and recent phases (for phase
//! stability). Switching frequency never mixes histories.

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use std::collections::BTreeMap;

/// Default number of samples in each window
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Fixed-capacity moving average; the oldest value is overwritten when full
pub struct MovingAverage {
    ring: HeapRb<f64>,
}

impl MovingAverage {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
        }
    }

    /// Push a value and return the average of the window including it
    pub fn push(&mut self, value: f64) -> f64 {
        self.ring.push_overwrite(value);
        self.average()
    }

    pub fn average(&self) -> f64 {
        let len = self.ring.occupied_len();
        if len == 0 {
            return 0.0;
        }
        self.ring.iter().sum::<f64>() / len as f64
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.occupied_len() == 0
    }

    /// Window contents, oldest first
    pub fn values(&self) -> Vec<f64> {
        self.ring.iter().copied().collect()
    }
}

/// Magnitude and phase history for one carrier frequency
struct FrequencyWindow {
    magnitudes: MovingAverage,
    phases: MovingAverage,
}

/// Result of pushing one sample into a [`SmoothingBank`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoothed {
    /// Moving average of the magnitude, including the new sample
    pub magnitude: f64,
    /// Phase stability over the window, including the new sample
    pub phase_stability: f64,
}

/// Moving windows keyed by carrier frequency
pub struct SmoothingBank {
    window_size: usize,
    windows: BTreeMap<u64, FrequencyWindow>,
}

impl SmoothingBank {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            windows: BTreeMap::new(),
        }
    }

    /// Feed one sample's magnitude and phase
    pub fn push(&mut self, frequency_hz: f64, magnitude: f64, phase_degrees: f64) -> Smoothed {
        let size = self.window_size;
        let window = self
            .windows
            .entry(frequency_key(frequency_hz))
            .or_insert_with(|| FrequencyWindow {
                magnitudes: MovingAverage::new(size),
                phases: MovingAverage::new(size),
            });

        let magnitude = window.magnitudes.push(magnitude);
        window.phases.push(phase_degrees);
        let phase_stability = super::quality::phase_stability(&window.phases.values());

        Smoothed {
            magnitude,
            phase_stability,
        }
    }

    /// Number of samples currently held for a frequency
    pub fn depth_of(&self, frequency_hz: f64) -> usize {
        self.windows
            .get(&frequency_key(frequency_hz))
            .map(|w| w.magnitudes.len())
            .unwrap_or(0)
    }

    /// Forget every window
    pub fn reset(&mut self) {
        self.windows.clear();
    }
}

impl Default for SmoothingBank {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

/// Windows are keyed on the frequency rounded to whole hertz
fn frequency_key(frequency_hz: f64) -> u64 {
    frequency_hz.max(0.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_moving_average_fills_then_slides() {
        let mut avg = MovingAverage::new(3);
        assert_relative_eq!(avg.push(3.0), 3.0);
        assert_relative_eq!(avg.push(6.0), 4.5);
        assert_relative_eq!(avg.push(9.0), 6.0);
        // 3.0 falls out
        assert_relative_eq!(avg.push(12.0), 9.0);
        assert_eq!(avg.len(), 3);
        assert_eq!(avg.values(), vec![6.0, 9.0, 12.0]);
    }

    #[test]
    fn test_empty_average() {
        let avg = MovingAverage::new(4);
        assert!(avg.is_empty());
        assert_eq!(avg.average(), 0.0);
    }

    #[test]
    fn test_bank_keeps_frequencies_apart() {
        let mut bank = SmoothingBank::new(10);
        bank.push(19_000.0, 100.0, 10.0);
        bank.push(19_000.0, 200.0, 10.0);
        let other = bank.push(77_500.0, 1000.0, 10.0);

        assert_relative_eq!(other.magnitude, 1000.0);
        assert_eq!(bank.depth_of(19_000.0), 2);
        assert_eq!(bank.depth_of(77_500.0), 1);
    }

    #[test]
    fn test_bank_window_is_bounded() {
        let mut bank = SmoothingBank::new(10);
        for i in 0..25 {
            bank.push(70_000.0, i as f64, 0.0);
        }
        assert_eq!(bank.depth_of(70_000.0), 10);
        let last = bank.push(70_000.0, 25.0, 0.0);
        // window now holds 16..=25
        assert_relative_eq!(last.magnitude, 20.5);
    }

    #[test]
    fn test_reset_clears() {
        let mut bank = SmoothingBank::default();
        bank.push(19_000.0, 1.0, 0.0);
        bank.reset();
        assert_eq!(bank.depth_of(19_000.0), 0);
    }
}
