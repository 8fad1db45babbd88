//! Reading types shared by the device and file ingestion paths

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One instrument observation before any processing
///
/// Produced by the transport layer from a DATA frame or by the file codec
/// from a survey data line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
    /// Carrier frequency in Hz
    pub frequency_hz: f64,
    /// In-phase component
    pub real: f64,
    /// Quadrature component
    pub imaginary: f64,
    /// Battery level reported with the sample (device path only)
    pub device_battery_percent: Option<u8>,
    /// Probe temperature reported with the sample (device path only)
    pub device_temperature_c: Option<f32>,
    /// GPS position logged with the sample (survey files only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPosition>,
    /// Survey profile the sample belongs to, counted from 1 (ESD only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<u32>,
}

/// WGS84 position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
}

impl RawSample {
    /// Create a sample without device housekeeping values
    pub fn new(timestamp: DateTime<Utc>, frequency_hz: f64, real: f64, imaginary: f64) -> Self {
        Self {
            timestamp,
            frequency_hz,
            real,
            imaginary,
            device_battery_percent: None,
            device_temperature_c: None,
            location: None,
            profile: None,
        }
    }

    /// Attach survey provenance
    pub fn with_survey_origin(
        mut self,
        location: Option<GeoPosition>,
        profile: Option<u32>,
    ) -> Self {
        self.location = location;
        self.profile = profile;
        self
    }

    /// Attach battery and temperature values reported by the device
    pub fn with_device_state(
        mut self,
        battery_percent: Option<u8>,
        temperature_c: Option<f32>,
    ) -> Self {
        self.device_battery_percent = battery_percent;
        self.device_temperature_c = temperature_c;
        self
    }

    /// `sqrt(real² + imaginary²)`
    pub fn magnitude(&self) -> f64 {
        self.real.hypot(self.imaginary)
    }

    /// `atan2(imaginary, real)` in degrees
    pub fn phase_degrees(&self) -> f64 {
        self.imaginary.atan2(self.real).to_degrees()
    }
}

/// Coarse material estimate for the ground under the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MaterialClass {
    Unknown,
    Metal,
    Water,
    WetSoil,
    DrySoil,
    Sand,
    Clay,
    Air,
}

impl MaterialClass {
    /// Every class, in declaration order
    pub const ALL: [MaterialClass; 8] = [
        MaterialClass::Unknown,
        MaterialClass::Metal,
        MaterialClass::Water,
        MaterialClass::WetSoil,
        MaterialClass::DrySoil,
        MaterialClass::Sand,
        MaterialClass::Clay,
        MaterialClass::Air,
    ];

    /// Attenuation factor used by the depth model when this material is assumed
    ///
    /// Unknown and dry soil share the instrument default of 0.417.
    pub fn attenuation_factor(self) -> f64 {
        match self {
            MaterialClass::Air => 0.1,
            MaterialClass::Sand => 0.3,
            MaterialClass::Unknown | MaterialClass::DrySoil => {
                super::depth::DEFAULT_ATTENUATION_FACTOR
            }
            MaterialClass::WetSoil => 0.8,
            MaterialClass::Clay => 0.9,
            MaterialClass::Water => 1.2,
            MaterialClass::Metal => 2.0,
        }
    }
}

impl fmt::Display for MaterialClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MaterialClass::Unknown => "unknown",
            MaterialClass::Metal => "metal",
            MaterialClass::Water => "water",
            MaterialClass::WetSoil => "wet soil",
            MaterialClass::DrySoil => "dry soil",
            MaterialClass::Sand => "sand",
            MaterialClass::Clay => "clay",
            MaterialClass::Air => "air",
        };
        f.write_str(name)
    }
}

/// A raw sample with its derived physical quantities
///
/// `depth_meters` is always `depth(magnitude, calibration_constant,
/// attenuation_factor)` and `quality_score` is always a function of
/// `magnitude`, `frequency_hz` and `phase_stability`, so both can be
/// recomputed from the reading alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// The sample this reading was derived from
    pub sample: RawSample,
    /// Unsmoothed `sqrt(real² + imaginary²)`
    pub raw_magnitude: f64,
    /// Magnitude the depth was computed from (smoothed in continuous mode)
    pub magnitude: f64,
    /// Phase angle in degrees
    pub phase_degrees: f64,
    /// Frequency calibration constant that was applied
    pub calibration_constant: f64,
    /// Attenuation factor that was applied
    pub attenuation_factor: f64,
    /// Estimated depth in meters (never negative)
    pub depth_meters: f64,
    /// Confidence in the depth estimate (0.0 to 1.0)
    pub depth_confidence: f64,
    /// Phase stability over the recent window (1.0 for single-shot readings)
    pub phase_stability: f64,
    /// Overall signal quality (0.0 to 1.0)
    pub quality_score: f64,
    /// Estimated self-noise of the magnitude
    pub noise_level: f64,
    /// Coarse material estimate
    pub material_class: MaterialClass,
}

impl Reading {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.sample.timestamp
    }

    pub fn frequency_hz(&self) -> f64 {
        self.sample.frequency_hz
    }
}
