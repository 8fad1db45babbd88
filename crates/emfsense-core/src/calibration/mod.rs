//! Calibration subsystem
//!
//! Five independently managed corrections, applied by
//! [`CalibrationStore::calibrate`] in a fixed order:
//!
//! 1. Autobalance baseline subtraction
//! 2. Per-frequency gain
//! 3. Temperature compensation
//! 4. Spatial position correction, XY then XZ
//! 5. Signal-constant re-calibration and depth recomputation
//!
//! Step 5 always runs; steps 1-4 only for kinds that are both calibrated
//! and enabled.

pub mod autobalance;
pub mod frequency;
pub mod spatial;
pub mod store;
pub mod temperature;

use crate::codec::{CodecError, Point3};
use crate::signal::Reading;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use autobalance::{AutobalanceCalibration, AutobalanceRun};
pub use frequency::{FrequencyCalibration, FrequencyGain};
pub use spatial::SpatialCalibration;
pub use store::{CalibrationSnapshot, CalibrationStatus, CalibrationStore};
pub use temperature::TemperatureCalibration;

/// Errors that can occur while building or loading calibration state
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Need {required} samples, have {available}")]
    InsufficientSamples { required: usize, available: usize },

    #[error("Expected plane tag `{expected}`, found `{found}`")]
    PlaneTagMismatch { expected: String, found: String },

    #[error("No {0} calibration loaded")]
    NoCalibrationLoaded(CalibrationKind),

    #[error("Calibration file: {0}")]
    Parse(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Calibration state: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CalibrationKind {
    Autobalance,
    Frequency,
    Temperature,
    Xy,
    Xz,
}

impl CalibrationKind {
    /// Every kind, in application order
    pub const ALL: [CalibrationKind; 5] = [
        CalibrationKind::Autobalance,
        CalibrationKind::Frequency,
        CalibrationKind::Temperature,
        CalibrationKind::Xy,
        CalibrationKind::Xz,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CalibrationKind::Autobalance => "autobalance",
            CalibrationKind::Frequency => "frequency",
            CalibrationKind::Temperature => "temperature",
            CalibrationKind::Xy => "xy",
            CalibrationKind::Xz => "xz",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CalibrationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CalibrationKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown calibration kind `{s}`"))
    }
}

/// The corrections that produced a [`CalibratedReading`]
///
/// `None` means the kind was not applied.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppliedCorrections {
    pub baseline: Option<f64>,
    pub frequency_gain: Option<f64>,
    pub temperature_factor: Option<f64>,
    pub xy_offset: Option<Point3>,
    pub xz_offset: Option<Point3>,
    /// Frequency constant used for the final re-calibration
    pub signal_constant: f64,
}

/// A reading with every active calibration folded in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedReading {
    pub reading: Reading,
    /// Signal after baseline, gain and temperature correction
    pub corrected_signal_strength: f64,
    /// `corrected_signal_strength × constant / 1000`
    pub calibrated_signal: f64,
    pub corrected_depth: f64,
    /// Probe position the reading was taken at
    pub observed_position: Point3,
    pub corrected_position: Point3,
    pub corrections: AppliedCorrections,
}

fn default_autobalance_samples() -> usize {
    autobalance::DEFAULT_SAMPLE_COUNT
}

fn default_reference_temperature() -> f64 {
    temperature::DEFAULT_REFERENCE_C
}

fn default_temperature_coefficient() -> f64 {
    temperature::DEFAULT_COEFFICIENT
}

fn default_spatial_neighbours() -> usize {
    spatial::DEFAULT_NEIGHBOURS
}

/// Calibration tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Readings averaged into an autobalance baseline
    #[serde(default = "default_autobalance_samples")]
    pub autobalance_samples: usize,
    #[serde(default = "default_reference_temperature")]
    pub reference_temperature_c: f64,
    /// Fractional signal change per °C
    #[serde(default = "default_temperature_coefficient")]
    pub temperature_coefficient: f64,
    /// Reference points blended per spatial correction
    #[serde(default = "default_spatial_neighbours")]
    pub spatial_neighbours: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            autobalance_samples: default_autobalance_samples(),
            reference_temperature_c: default_reference_temperature(),
            temperature_coefficient: default_temperature_coefficient(),
            spatial_neighbours: default_spatial_neighbours(),
        }
    }
}
