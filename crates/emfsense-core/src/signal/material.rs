//! Coarse material classification
//!
//! An ordered decision table over magnitude, absolute phase and carrier
//! frequency. Rules are evaluated top to bottom and the first match wins;
//! no match yields [`MaterialClass::Unknown`]. The thresholds are heuristic
//! and live in configuration so they can be re-tuned without code changes.

use super::sample::MaterialClass;
use serde::{Deserialize, Serialize};

/// Half-open interval `[min, max)`; a missing bound is unbounded
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Bounds {
    pub const ANY: Bounds = Bounds { min: None, max: None };

    pub const fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub const fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub const fn below(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value < max)
    }
}

/// One row of the decision table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRule {
    pub material: MaterialClass,
    /// Magnitude range
    #[serde(default)]
    pub magnitude: Bounds,
    /// Absolute phase range in degrees (0 to 180)
    #[serde(default)]
    pub phase_degrees: Bounds,
    /// Carrier frequency range in Hz
    #[serde(default)]
    pub frequency_hz: Bounds,
}

impl MaterialRule {
    pub fn matches(&self, magnitude: f64, phase_degrees: f64, frequency_hz: f64) -> bool {
        self.magnitude.contains(magnitude)
            && self.phase_degrees.contains(phase_degrees.abs())
            && self.frequency_hz.contains(frequency_hz)
    }
}

/// The built-in decision table
pub fn default_rules() -> Vec<MaterialRule> {
    vec![
        MaterialRule {
            material: MaterialClass::Metal,
            magnitude: Bounds::at_least(5000.0),
            phase_degrees: Bounds::below(30.0),
            frequency_hz: Bounds::ANY,
        },
        MaterialRule {
            material: MaterialClass::Water,
            magnitude: Bounds::between(1000.0, 5000.0),
            phase_degrees: Bounds::between(60.0, 120.0),
            frequency_hz: Bounds::ANY,
        },
        MaterialRule {
            material: MaterialClass::WetSoil,
            magnitude: Bounds::between(500.0, 2000.0),
            phase_degrees: Bounds::between(30.0, 60.0),
            frequency_hz: Bounds::ANY,
        },
        MaterialRule {
            material: MaterialClass::Clay,
            magnitude: Bounds::between(200.0, 1000.0),
            phase_degrees: Bounds::between(45.0, 90.0),
            frequency_hz: Bounds::below(80_000.0),
        },
        MaterialRule {
            material: MaterialClass::DrySoil,
            magnitude: Bounds::between(100.0, 500.0),
            phase_degrees: Bounds::below(45.0),
            frequency_hz: Bounds::ANY,
        },
        MaterialRule {
            material: MaterialClass::Sand,
            magnitude: Bounds::between(50.0, 200.0),
            phase_degrees: Bounds::below(30.0),
            frequency_hz: Bounds::ANY,
        },
        MaterialRule {
            material: MaterialClass::Air,
            magnitude: Bounds::below(10.0),
            phase_degrees: Bounds::ANY,
            frequency_hz: Bounds::ANY,
        },
    ]
}

/// First-match classifier over a rule list
#[derive(Debug, Clone)]
pub struct MaterialClassifier {
    rules: Vec<MaterialRule>,
}

impl MaterialClassifier {
    pub fn new(rules: Vec<MaterialRule>) -> Self {
        Self { rules }
    }

    pub fn classify(&self, magnitude: f64, phase_degrees: f64, frequency_hz: f64) -> MaterialClass {
        self.rules
            .iter()
            .find(|rule| rule.matches(magnitude, phase_degrees, frequency_hz))
            .map(|rule| rule.material)
            .unwrap_or(MaterialClass::Unknown)
    }

    pub fn rules(&self) -> &[MaterialRule] {
        &self.rules
    }
}

impl Default for MaterialClassifier {
    fn default() -> Self {
        Self::new(default_rules())
    }
}
