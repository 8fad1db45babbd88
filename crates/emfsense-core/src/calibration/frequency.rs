//! Per-frequency gain
//!
//! Gains come from a labeled data set: for each carrier, `reference /
//! mean(observed signal)`, where the reference defaults to the carrier's
//! table constant.

use super::CalibrationError;
use crate::signal::depth::{DepthModel, DEFAULT_FREQUENCY_TOLERANCE_HZ};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyGain {
    pub frequency_hz: f64,
    pub gain: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyCalibration {
    pub gains: Vec<FrequencyGain>,
    #[serde(default = "default_tolerance")]
    pub tolerance_hz: f64,
}

fn default_tolerance() -> f64 {
    DEFAULT_FREQUENCY_TOLERANCE_HZ
}

impl Default for FrequencyCalibration {
    fn default() -> Self {
        Self {
            gains: Vec::new(),
            tolerance_hz: default_tolerance(),
        }
    }
}

impl FrequencyCalibration {
    /// Derive gains from `(frequency, observed signal)` pairs
    ///
    /// Observations within the tolerance of one another share a gain.
    /// Carriers whose mean signal is not positive are left out.
    pub fn from_samples(
        samples: &[(f64, f64)],
        model: &DepthModel,
    ) -> Result<Self, CalibrationError> {
        Self::from_samples_with(samples, model, |frequency_hz| model.constant_for(frequency_hz))
    }

    /// As [`from_samples`](Self::from_samples) with explicit reference values
    pub fn from_samples_with(
        samples: &[(f64, f64)],
        model: &DepthModel,
        reference: impl Fn(f64) -> f64,
    ) -> Result<Self, CalibrationError> {
        let tolerance_hz = model.frequency_tolerance_hz();
        let mut groups: Vec<(f64, f64, usize)> = Vec::new();
        for &(frequency_hz, signal) in samples {
            match groups
                .iter_mut()
                .find(|(f, _, _)| (f - frequency_hz).abs() <= tolerance_hz)
            {
                Some(group) => {
                    group.1 += signal;
                    group.2 += 1;
                }
                None => groups.push((frequency_hz, signal, 1)),
            }
        }

        let gains: Vec<FrequencyGain> = groups
            .into_iter()
            .filter_map(|(frequency_hz, sum, count)| {
                let mean = sum / count as f64;
                (mean > 0.0).then(|| FrequencyGain {
                    frequency_hz,
                    gain: reference(frequency_hz) / mean,
                })
            })
            .collect();

        if gains.is_empty() {
            return Err(CalibrationError::InsufficientSamples {
                required: 1,
                available: 0,
            });
        }
        Ok(Self {
            gains,
            tolerance_hz,
        })
    }

    pub fn is_calibrated(&self) -> bool {
        !self.gains.is_empty()
    }

    /// Gain for a frequency, if one was calibrated within tolerance
    pub fn gain_for(&self, frequency_hz: f64) -> Option<f64> {
        self.gains
            .iter()
            .filter(|g| (g.frequency_hz - frequency_hz).abs() <= self.tolerance_hz)
            .min_by(|a, b| {
                let da = (a.frequency_hz - frequency_hz).abs();
                let db = (b.frequency_hz - frequency_hz).abs();
                da.total_cmp(&db)
            })
            .map(|g| g.gain)
    }
}
