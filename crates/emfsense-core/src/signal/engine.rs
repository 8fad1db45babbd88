//! Raw sample to reading conversion
//!
//! Two entry points:
//! - [`SignalEngine::process_single`] for file-derived samples; stateless,
//!   no smoothing
//! - [`SignalEngine::process_continuous`] for the live stream; magnitude is
//!   smoothed per frequency and phase stability comes from the window

use super::depth::{
    DepthModel, DEFAULT_ATTENUATION_FACTOR, DEFAULT_CALIBRATION_CONSTANT,
    DEFAULT_FREQUENCY_TOLERANCE_HZ,
};
use super::material::{default_rules, MaterialClassifier, MaterialRule};
use super::quality;
use super::sample::{MaterialClass, RawSample, Reading};
use super::smoothing::{SmoothingBank, DEFAULT_WINDOW_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_smoothing_window() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_frequency_tolerance() -> f64 {
    DEFAULT_FREQUENCY_TOLERANCE_HZ
}

fn default_constant() -> f64 {
    DEFAULT_CALIBRATION_CONSTANT
}

fn default_attenuation() -> f64 {
    DEFAULT_ATTENUATION_FACTOR
}

/// Tunables for the signal engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Moving-average window per frequency (continuous mode)
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,
    /// Maximum distance from a table frequency for its constant to apply
    #[serde(default = "default_frequency_tolerance")]
    pub frequency_tolerance_hz: f64,
    /// Constant for frequencies outside the table
    #[serde(default = "default_constant")]
    pub default_constant: f64,
    /// Attenuation used when no material is assumed
    #[serde(default = "default_attenuation")]
    pub attenuation_factor: f64,
    /// Material whose attenuation overrides `attenuation_factor`
    #[serde(default)]
    pub assumed_material: Option<MaterialClass>,
    /// Classification decision table, evaluated top to bottom
    #[serde(default = "default_rules")]
    pub material_rules: Vec<MaterialRule>,
}

impl SignalConfig {
    /// Attenuation factor after applying the assumed material, if any
    pub fn effective_attenuation(&self) -> f64 {
        self.assumed_material
            .map(MaterialClass::attenuation_factor)
            .unwrap_or(self.attenuation_factor)
    }

    /// Depth model described by this config
    pub fn depth_model(&self) -> DepthModel {
        DepthModel::new(
            self.frequency_tolerance_hz,
            self.default_constant,
            self.effective_attenuation(),
        )
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            smoothing_window: default_smoothing_window(),
            frequency_tolerance_hz: default_frequency_tolerance(),
            default_constant: default_constant(),
            attenuation_factor: default_attenuation(),
            assumed_material: None,
            material_rules: default_rules(),
        }
    }
}

/// Converts raw samples into readings
pub struct SignalEngine {
    model: DepthModel,
    classifier: MaterialClassifier,
    smoothing: SmoothingBank,
}

impl SignalEngine {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            model: config.depth_model(),
            classifier: MaterialClassifier::new(config.material_rules.clone()),
            smoothing: SmoothingBank::new(config.smoothing_window),
        }
    }

    pub fn depth_model(&self) -> &DepthModel {
        &self.model
    }

    /// Process a standalone sample (no smoothing, phase stability 1.0)
    pub fn process_single(&self, sample: RawSample) -> Reading {
        let magnitude = sample.magnitude();
        self.build_reading(sample, magnitude, 1.0)
    }

    /// Process a sample from the live stream
    pub fn process_continuous(&mut self, sample: RawSample) -> Reading {
        let smoothed = self.smoothing.push(
            sample.frequency_hz,
            sample.magnitude(),
            sample.phase_degrees(),
        );
        self.build_reading(sample, smoothed.magnitude, smoothed.phase_stability)
    }

    /// Process parallel I/Q arrays captured at one frequency
    ///
    /// # Panics
    /// If `reals` and `imaginaries` differ in length.
    pub fn process_iq(
        &self,
        timestamp: DateTime<Utc>,
        frequency_hz: f64,
        reals: &[f64],
        imaginaries: &[f64],
    ) -> Vec<Reading> {
        assert_eq!(
            reals.len(),
            imaginaries.len(),
            "I/Q arrays must have the same length"
        );
        reals
            .iter()
            .zip(imaginaries)
            .map(|(&re, &im)| self.process_single(RawSample::new(timestamp, frequency_hz, re, im)))
            .collect()
    }

    /// Drop all smoothing history (new acquisition)
    pub fn reset(&mut self) {
        self.smoothing.reset();
    }

    fn build_reading(&self, sample: RawSample, magnitude: f64, phase_stability: f64) -> Reading {
        let frequency_hz = sample.frequency_hz;
        let raw_magnitude = sample.magnitude();
        let phase_degrees = sample.phase_degrees();

        let calibration_constant = self.model.constant_for(frequency_hz);
        let attenuation_factor = self.model.attenuation_factor();
        let depth_meters =
            super::depth::depth_from_signal(magnitude, calibration_constant, attenuation_factor);

        let depth_confidence = quality::depth_confidence(magnitude, frequency_hz, depth_meters);
        let quality_score = quality::quality_score(magnitude, frequency_hz, phase_stability);
        let noise_level = quality::noise_level(magnitude);
        let material_class = self
            .classifier
            .classify(magnitude, phase_degrees, frequency_hz);

        Reading {
            sample,
            raw_magnitude,
            magnitude,
            phase_degrees,
            calibration_constant,
            attenuation_factor,
            depth_meters,
            depth_confidence,
            phase_stability,
            quality_score,
            noise_level,
            material_class,
        }
    }
}

impl Default for SignalEngine {
    fn default() -> Self {
        Self::new(&SignalConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::depth::depth_from_signal;
    use approx::assert_relative_eq;

    fn sample(freq: f64, re: f64, im: f64) -> RawSample {
        RawSample::new(Utc::now(), freq, re, im)
    }

    #[test]
    fn test_single_shot_reading() {
        let engine = SignalEngine::default();
        let reading = engine.process_single(sample(19_000.0, 60.0, 80.0));

        assert_relative_eq!(reading.raw_magnitude, 100.0);
        assert_relative_eq!(reading.magnitude, 100.0);
        assert_relative_eq!(reading.calibration_constant, 3333.0);
        assert_relative_eq!(reading.phase_stability, 1.0);
        assert_relative_eq!(
            reading.depth_meters,
            -(0.3333f64).ln() / 0.417,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_reading_is_recomputable_from_fields() {
        let engine = SignalEngine::default();
        let r = engine.process_single(sample(124_000.0, 12.0, -35.0));
        let depth = depth_from_signal(r.magnitude, r.calibration_constant, r.attenuation_factor);
        let q = quality::quality_score(r.magnitude, r.frequency_hz(), r.phase_stability);
        assert_relative_eq!(r.depth_meters, depth);
        assert_relative_eq!(r.quality_score, q);
    }

    #[test]
    fn test_continuous_smooths_magnitude() {
        let mut engine = SignalEngine::default();
        engine.process_continuous(sample(77_500.0, 100.0, 0.0));
        let second = engine.process_continuous(sample(77_500.0, 300.0, 0.0));
        assert_relative_eq!(second.raw_magnitude, 300.0);
        assert_relative_eq!(second.magnitude, 200.0);

        engine.reset();
        let after_reset = engine.process_continuous(sample(77_500.0, 300.0, 0.0));
        assert_relative_eq!(after_reset.magnitude, 300.0);
    }

    #[test]
    fn test_assumed_material_overrides_attenuation() {
        let config = SignalConfig {
            assumed_material: Some(MaterialClass::Metal),
            ..Default::default()
        };
        let engine = SignalEngine::new(&config);
        let r = engine.process_single(sample(19_000.0, 10.0, 0.0));
        assert_relative_eq!(r.attenuation_factor, 2.0);
    }

    #[test]
    fn test_process_iq_arrays() {
        let engine = SignalEngine::default();
        let readings = engine.process_iq(Utc::now(), 70_000.0, &[3.0, 6.0], &[4.0, 8.0]);
        assert_eq!(readings.len(), 2);
        assert_relative_eq!(readings[1].magnitude, 10.0);
    }

    #[test]
    #[should_panic(expected = "same length")]
    fn test_process_iq_length_mismatch_panics() {
        let engine = SignalEngine::default();
        engine.process_iq(Utc::now(), 70_000.0, &[1.0, 2.0], &[1.0]);
    }

    #[test]
    fn test_scores_are_bounded() {
        let engine = SignalEngine::default();
        for (re, im) in [(0.0, 0.0), (1.0, 1.0), (1e4, -1e4), (1e9, 3.0)] {
            let r = engine.process_single(sample(23_400.0, re, im));
            assert!((0.0..=1.0).contains(&r.quality_score));
            assert!((0.0..=1.0).contains(&r.depth_confidence));
            assert!(r.depth_meters >= 0.0);
        }
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: SignalConfig = serde_json::from_str(r#"{"smoothing_window": 4}"#).unwrap();
        assert_eq!(config.smoothing_window, 4);
        assert_relative_eq!(config.attenuation_factor, 0.417);
        assert_eq!(config.material_rules.len(), default_rules().len());
    }
}
