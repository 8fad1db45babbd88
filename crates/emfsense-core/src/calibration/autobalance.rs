//! Autobalance baseline
//!
//! The baseline is the mean signal of the first N readings of a dedicated
//! calibration run, taken with the probe held away from any target.

use super::CalibrationError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SAMPLE_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AutobalanceCalibration {
    pub baseline: Option<f64>,
}

impl AutobalanceCalibration {
    /// Baseline from the first `required` signals
    pub fn from_signals(signals: &[f64], required: usize) -> Result<Self, CalibrationError> {
        let required = required.max(1);
        if signals.len() < required {
            return Err(CalibrationError::InsufficientSamples {
                required,
                available: signals.len(),
            });
        }
        let window = &signals[..required];
        let baseline = window.iter().sum::<f64>() / window.len() as f64;
        Ok(Self {
            baseline: Some(baseline),
        })
    }

    pub fn is_calibrated(&self) -> bool {
        self.baseline.is_some()
    }

    /// `max(0, signal − baseline)`
    pub fn apply(&self, signal: f64) -> f64 {
        match self.baseline {
            Some(baseline) => (signal - baseline).max(0.0),
            None => signal,
        }
    }
}

/// Collects signals for a calibration run
#[derive(Debug, Clone)]
pub struct AutobalanceRun {
    required: usize,
    signals: Vec<f64>,
}

impl AutobalanceRun {
    pub fn new(required: usize) -> Self {
        let required = required.max(1);
        Self {
            required,
            signals: Vec::with_capacity(required),
        }
    }

    /// Add a signal; returns true once enough have been collected
    pub fn push(&mut self, signal: f64) -> bool {
        if self.signals.len() < self.required {
            self.signals.push(signal);
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.signals.len() >= self.required
    }

    pub fn collected(&self) -> usize {
        self.signals.len()
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn finish(&self) -> Result<AutobalanceCalibration, CalibrationError> {
        AutobalanceCalibration::from_signals(&self.signals, self.required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_baseline_of_ten() {
        let signals: Vec<f64> = (100..110).map(f64::from).collect();
        let cal = AutobalanceCalibration::from_signals(&signals, 10).unwrap();
        assert_relative_eq!(cal.baseline.unwrap(), 104.5);
        assert_relative_eq!(cal.apply(150.0), 45.5);
        assert_relative_eq!(cal.apply(50.0), 0.0);
    }

    #[test]
    fn test_only_first_n_used() {
        let mut signals: Vec<f64> = vec![10.0; 10];
        signals.push(1000.0);
        let cal = AutobalanceCalibration::from_signals(&signals, 10).unwrap();
        assert_relative_eq!(cal.baseline.unwrap(), 10.0);
    }

    #[test]
    fn test_insufficient_samples() {
        let err = AutobalanceCalibration::from_signals(&[1.0; 9], 10).unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::InsufficientSamples {
                required: 10,
                available: 9
            }
        ));
    }

    #[test]
    fn test_uncalibrated_passthrough() {
        assert_eq!(AutobalanceCalibration::default().apply(42.0), 42.0);
    }

    #[test]
    fn test_run_completes() {
        let mut run = AutobalanceRun::new(3);
        assert!(run.finish().is_err());
        assert!(!run.push(1.0));
        assert!(!run.push(2.0));
        assert!(run.push(3.0));
        assert!(run.push(99.0));
        assert_eq!(run.collected(), 3);
        assert_relative_eq!(run.finish().unwrap().baseline.unwrap(), 2.0);
    }
}
