//! Frequency calibration constants and the logarithmic depth model
//!
//! The instrument scales the raw magnitude by a per-carrier constant and
//! treats the result as an exponentially attenuated field strength:
//!
//! ```text
//! calibrated = magnitude × constant / 1000
//! depth      = −ln(calibrated / 1000) / attenuation     (calibrated > 0)
//!            = 0                                         (otherwise)
//! ```
//!
//! Negative results (a field stronger than the reference level) are clamped
//! to zero.

/// The seven excitation frequencies the probe can be switched to, in Hz
pub const CARRIER_FREQUENCIES: [f64; 7] = [
    19_000.0, 23_400.0, 70_000.0, 77_500.0, 124_000.0, 129_100.0, 135_600.0,
];

/// Carrier frequency (Hz) to calibration constant
pub const CALIBRATION_TABLE: [(f64, f64); 7] = [
    (19_000.0, 3333.0),
    (23_400.0, 3200.0),
    (70_000.0, 2800.0),
    (77_500.0, 2750.0),
    (124_000.0, 2400.0),
    (129_100.0, 2350.0),
    (135_600.0, 2300.0),
];

/// Constant used for frequencies outside the table
pub const DEFAULT_CALIBRATION_CONSTANT: f64 = 3333.0;

/// Attenuation used when no material is assumed
pub const DEFAULT_ATTENUATION_FACTOR: f64 = 0.417;

/// How far a frequency may be from a table entry and still match it
pub const DEFAULT_FREQUENCY_TOLERANCE_HZ: f64 = 50.0;

/// Carrier frequency for a 0-based index into [`CARRIER_FREQUENCIES`]
pub fn carrier_frequency(index: usize) -> Option<f64> {
    CARRIER_FREQUENCIES.get(index).copied()
}

/// `magnitude × constant / 1000`
#[inline]
pub fn calibrated_signal(magnitude: f64, constant: f64) -> f64 {
    magnitude * (constant / 1000.0)
}

/// Depth in meters for a magnitude, clamped at zero
pub fn depth_from_signal(magnitude: f64, constant: f64, attenuation_factor: f64) -> f64 {
    let calibrated = calibrated_signal(magnitude, constant);
    if calibrated.is_nan() || calibrated <= 0.0 || attenuation_factor <= 0.0 {
        return 0.0;
    }
    let depth = -(calibrated / 1000.0).ln() / attenuation_factor;
    depth.max(0.0)
}

/// Depth model with a configurable constant-table tolerance and attenuation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthModel {
    frequency_tolerance_hz: f64,
    default_constant: f64,
    attenuation_factor: f64,
}

impl DepthModel {
    pub fn new(
        frequency_tolerance_hz: f64,
        default_constant: f64,
        attenuation_factor: f64,
    ) -> Self {
        Self {
            frequency_tolerance_hz,
            default_constant,
            attenuation_factor,
        }
    }

    /// Same model with a different attenuation factor
    pub fn with_attenuation(self, attenuation_factor: f64) -> Self {
        Self {
            attenuation_factor,
            ..self
        }
    }

    pub fn attenuation_factor(&self) -> f64 {
        self.attenuation_factor
    }

    pub fn frequency_tolerance_hz(&self) -> f64 {
        self.frequency_tolerance_hz
    }

    /// Table constant for a frequency, if one is within tolerance
    pub fn lookup_constant(&self, frequency_hz: f64) -> Option<f64> {
        CALIBRATION_TABLE
            .iter()
            .find(|(freq, _)| (freq - frequency_hz).abs() <= self.frequency_tolerance_hz)
            .map(|&(_, constant)| constant)
    }

    /// Table constant for a frequency, falling back to the default constant
    pub fn constant_for(&self, frequency_hz: f64) -> f64 {
        match self.lookup_constant(frequency_hz) {
            Some(constant) => constant,
            None => {
                tracing::warn!(
                    frequency_hz,
                    fallback = self.default_constant,
                    "frequency outside calibration table, using default constant"
                );
                self.default_constant
            }
        }
    }

    /// Depth for a magnitude observed at the given frequency
    pub fn depth(&self, magnitude: f64, frequency_hz: f64) -> f64 {
        depth_from_signal(magnitude, self.constant_for(frequency_hz), self.attenuation_factor)
    }
}

impl Default for DepthModel {
    fn default() -> Self {
        Self::new(
            DEFAULT_FREQUENCY_TOLERANCE_HZ,
            DEFAULT_CALIBRATION_CONSTANT,
            DEFAULT_ATTENUATION_FACTOR,
        )
    }
}
