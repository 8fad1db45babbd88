//! Linear temperature compensation

use serde::{Deserialize, Serialize};

pub const DEFAULT_REFERENCE_C: f64 = 25.0;
pub const DEFAULT_COEFFICIENT: f64 = 0.002;

/// `factor = 1 + (observed − reference) × coefficient`
///
/// Always calibrated; the defaults describe the stock probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureCalibration {
    pub reference_c: f64,
    pub coefficient: f64,
}

impl Default for TemperatureCalibration {
    fn default() -> Self {
        Self {
            reference_c: DEFAULT_REFERENCE_C,
            coefficient: DEFAULT_COEFFICIENT,
        }
    }
}

impl TemperatureCalibration {
    pub fn new(reference_c: f64, coefficient: f64) -> Self {
        Self {
            reference_c,
            coefficient,
        }
    }

    /// Multiplicative factor; exactly 1.0 when no temperature was reported
    pub fn factor(&self, observed_c: Option<f32>) -> f64 {
        match observed_c {
            Some(t) => 1.0 + (f64::from(t) - self.reference_c) * self.coefficient,
            None => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_factor() {
        let cal = TemperatureCalibration::default();
        assert_relative_eq!(cal.factor(Some(25.0)), 1.0);
        assert_relative_eq!(cal.factor(Some(35.0)), 1.02, epsilon = 1e-12);
        assert_relative_eq!(cal.factor(Some(15.0)), 0.98, epsilon = 1e-12);
        assert_eq!(cal.factor(None), 1.0);
    }
}
