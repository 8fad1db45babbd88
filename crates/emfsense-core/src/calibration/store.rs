//! Calibration state holder
//!
//! Each kind lives in its own `RwLock<Arc<_>>` slot. Updates build a new
//! value and swap the `Arc`, so a reading being calibrated sees either the
//! old or the new state of a kind, never a mix.

use super::{
    AppliedCorrections, AutobalanceCalibration, CalibratedReading, CalibrationConfig,
    CalibrationError, CalibrationKind, FrequencyCalibration, SpatialCalibration,
    TemperatureCalibration,
};
use crate::codec::{Plane, Point3};
use crate::signal::depth::{calibrated_signal, depth_from_signal};
use crate::signal::Reading;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

fn load<T>(slot: &RwLock<Arc<T>>) -> Arc<T> {
    Arc::clone(&slot.read().unwrap_or_else(PoisonError::into_inner))
}

fn swap<T>(slot: &RwLock<Arc<T>>, value: T) {
    *slot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(value);
}

fn plane_of(kind: CalibrationKind) -> Option<Plane> {
    match kind {
        CalibrationKind::Xy => Some(Plane::Xy),
        CalibrationKind::Xz => Some(Plane::Xz),
        _ => None,
    }
}

/// Per-kind status flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationStatus {
    pub calibrated: bool,
    pub enabled: bool,
}

impl CalibrationStatus {
    /// Calibrated and enabled
    pub fn active(&self) -> bool {
        self.calibrated && self.enabled
    }
}

/// All five states plus their toggles, for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSnapshot {
    pub autobalance: AutobalanceCalibration,
    pub frequency: FrequencyCalibration,
    pub temperature: TemperatureCalibration,
    pub xy: SpatialCalibration,
    pub xz: SpatialCalibration,
    #[serde(default)]
    pub enabled: BTreeMap<CalibrationKind, bool>,
}

pub struct CalibrationStore {
    config: CalibrationConfig,
    autobalance: RwLock<Arc<AutobalanceCalibration>>,
    frequency: RwLock<Arc<FrequencyCalibration>>,
    temperature: RwLock<Arc<TemperatureCalibration>>,
    xy: RwLock<Arc<SpatialCalibration>>,
    xz: RwLock<Arc<SpatialCalibration>>,
    enabled: [AtomicBool; 5],
}

impl CalibrationStore {
    pub fn new(config: CalibrationConfig) -> Self {
        let store = Self {
            autobalance: RwLock::new(Arc::new(AutobalanceCalibration::default())),
            frequency: RwLock::new(Arc::new(FrequencyCalibration::default())),
            temperature: RwLock::new(Arc::new(Self::default_temperature(&config))),
            xy: RwLock::new(Arc::new(SpatialCalibration::empty(Plane::Xy))),
            xz: RwLock::new(Arc::new(SpatialCalibration::empty(Plane::Xz))),
            enabled: std::array::from_fn(|_| AtomicBool::new(true)),
            config,
        };
        store.reset_all();
        store
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    fn default_temperature(config: &CalibrationConfig) -> TemperatureCalibration {
        TemperatureCalibration::new(config.reference_temperature_c, config.temperature_coefficient)
    }

    fn empty_spatial(&self, plane: Plane) -> SpatialCalibration {
        SpatialCalibration::empty(plane).with_neighbours(self.config.spatial_neighbours)
    }

    fn spatial_slot(&self, plane: Plane) -> &RwLock<Arc<SpatialCalibration>> {
        match plane {
            Plane::Xy => &self.xy,
            Plane::Xz => &self.xz,
        }
    }

    // Accessors

    pub fn autobalance(&self) -> Arc<AutobalanceCalibration> {
        load(&self.autobalance)
    }

    pub fn frequency(&self) -> Arc<FrequencyCalibration> {
        load(&self.frequency)
    }

    pub fn temperature(&self) -> Arc<TemperatureCalibration> {
        load(&self.temperature)
    }

    pub fn spatial(&self, plane: Plane) -> Arc<SpatialCalibration> {
        load(self.spatial_slot(plane))
    }

    // Updates

    pub fn set_autobalance(&self, calibration: AutobalanceCalibration) {
        swap(&self.autobalance, calibration);
        tracing::info!(baseline = ?calibration.baseline, "Autobalance baseline updated");
    }

    pub fn set_frequency(&self, calibration: FrequencyCalibration) {
        tracing::info!(carriers = calibration.gains.len(), "Frequency gains updated");
        swap(&self.frequency, calibration);
    }

    pub fn set_temperature(&self, calibration: TemperatureCalibration) {
        tracing::info!(
            reference_c = calibration.reference_c,
            coefficient = calibration.coefficient,
            "Temperature compensation updated"
        );
        swap(&self.temperature, calibration);
    }

    /// Install a spatial calibration in the slot for its plane
    pub fn set_spatial(&self, calibration: SpatialCalibration) {
        tracing::info!(
            plane = %calibration.plane,
            points = calibration.points.len(),
            "Spatial calibration updated"
        );
        let plane = calibration.plane;
        swap(self.spatial_slot(plane), calibration);
    }

    // Status

    pub fn is_calibrated(&self, kind: CalibrationKind) -> bool {
        match kind {
            CalibrationKind::Autobalance => self.autobalance().is_calibrated(),
            CalibrationKind::Frequency => self.frequency().is_calibrated(),
            CalibrationKind::Temperature => true,
            CalibrationKind::Xy => self.spatial(Plane::Xy).is_calibrated(),
            CalibrationKind::Xz => self.spatial(Plane::Xz).is_calibrated(),
        }
    }

    pub fn is_enabled(&self, kind: CalibrationKind) -> bool {
        self.enabled[kind.index()].load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, kind: CalibrationKind, enabled: bool) {
        self.enabled[kind.index()].store(enabled, Ordering::Release);
        tracing::debug!(%kind, enabled, "Calibration toggled");
    }

    pub fn status(&self) -> BTreeMap<CalibrationKind, CalibrationStatus> {
        CalibrationKind::ALL
            .into_iter()
            .map(|kind| {
                (
                    kind,
                    CalibrationStatus {
                        calibrated: self.is_calibrated(kind),
                        enabled: self.is_enabled(kind),
                    },
                )
            })
            .collect()
    }

    // Reset

    /// Return one kind to its uncalibrated default; its toggle is kept
    pub fn reset(&self, kind: CalibrationKind) {
        match kind {
            CalibrationKind::Autobalance => {
                swap(&self.autobalance, AutobalanceCalibration::default())
            }
            CalibrationKind::Frequency => swap(&self.frequency, FrequencyCalibration::default()),
            CalibrationKind::Temperature => {
                swap(&self.temperature, Self::default_temperature(&self.config))
            }
            CalibrationKind::Xy => swap(&self.xy, self.empty_spatial(Plane::Xy)),
            CalibrationKind::Xz => swap(&self.xz, self.empty_spatial(Plane::Xz)),
        }
        tracing::debug!(%kind, "Calibration reset");
    }

    pub fn reset_all(&self) {
        for kind in CalibrationKind::ALL {
            self.reset(kind);
        }
    }

    // Persistence

    /// One kind's state as JSON
    pub fn export_state(&self, kind: CalibrationKind) -> Result<String, CalibrationError> {
        if !self.is_calibrated(kind) {
            return Err(CalibrationError::NoCalibrationLoaded(kind));
        }
        let json = match kind {
            CalibrationKind::Autobalance => serde_json::to_string_pretty(&*self.autobalance())?,
            CalibrationKind::Frequency => serde_json::to_string_pretty(&*self.frequency())?,
            CalibrationKind::Temperature => serde_json::to_string_pretty(&*self.temperature())?,
            CalibrationKind::Xy => serde_json::to_string_pretty(&*self.spatial(Plane::Xy))?,
            CalibrationKind::Xz => serde_json::to_string_pretty(&*self.spatial(Plane::Xz))?,
        };
        Ok(json)
    }

    /// Replace one kind's state from JSON produced by [`export_state`](Self::export_state)
    pub fn import_state(&self, kind: CalibrationKind, json: &str) -> Result<(), CalibrationError> {
        match kind {
            CalibrationKind::Autobalance => self.set_autobalance(serde_json::from_str(json)?),
            CalibrationKind::Frequency => self.set_frequency(serde_json::from_str(json)?),
            CalibrationKind::Temperature => self.set_temperature(serde_json::from_str(json)?),
            CalibrationKind::Xy | CalibrationKind::Xz => {
                let calibration: SpatialCalibration = serde_json::from_str(json)?;
                let expected = plane_of(kind).unwrap_or(Plane::Xy);
                if calibration.plane != expected {
                    return Err(CalibrationError::PlaneTagMismatch {
                        expected: expected.tag().to_string(),
                        found: calibration.plane.tag().to_string(),
                    });
                }
                self.set_spatial(calibration);
            }
        }
        Ok(())
    }

    /// Load a calibration file
    ///
    /// Spatial kinds read a `.cal` file whose tag must match; the other
    /// kinds read the JSON written by [`save_state`](Self::save_state).
    /// On error the current state of `kind` is left unchanged.
    pub fn load_calibration(
        &self,
        kind: CalibrationKind,
        path: &Path,
    ) -> Result<(), CalibrationError> {
        let text = std::fs::read_to_string(path)?;
        match plane_of(kind) {
            Some(plane) => {
                let calibration = SpatialCalibration::from_cal_text(plane, &text)?
                    .with_neighbours(self.config.spatial_neighbours);
                self.set_spatial(calibration);
            }
            None => self.import_state(kind, &text)?,
        }
        tracing::info!(%kind, path = %path.display(), "Calibration loaded");
        Ok(())
    }

    /// Write one kind's state as JSON, creating parent directories
    pub fn save_state(&self, kind: CalibrationKind, path: &Path) -> Result<(), CalibrationError> {
        let json = self.export_state(kind)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        tracing::info!(%kind, path = %path.display(), "Calibration saved");
        Ok(())
    }

    pub fn snapshot(&self) -> CalibrationSnapshot {
        CalibrationSnapshot {
            autobalance: *self.autobalance(),
            frequency: (*self.frequency()).clone(),
            temperature: *self.temperature(),
            xy: (*self.spatial(Plane::Xy)).clone(),
            xz: (*self.spatial(Plane::Xz)).clone(),
            enabled: CalibrationKind::ALL
                .into_iter()
                .map(|kind| (kind, self.is_enabled(kind)))
                .collect(),
        }
    }

    pub fn restore(&self, snapshot: &CalibrationSnapshot) {
        swap(&self.autobalance, snapshot.autobalance);
        swap(&self.frequency, snapshot.frequency.clone());
        swap(&self.temperature, snapshot.temperature);
        swap(&self.xy, snapshot.xy.clone());
        swap(&self.xz, snapshot.xz.clone());
        for (kind, enabled) in &snapshot.enabled {
            self.set_enabled(*kind, *enabled);
        }
    }

    // Application

    /// Apply every active calibration to a reading taken at `observed`
    pub fn calibrate(&self, reading: &Reading, observed: Point3) -> CalibratedReading {
        let active = |kind| self.is_enabled(kind) && self.is_calibrated(kind);
        let constant = reading.calibration_constant;
        let mut corrections = AppliedCorrections {
            signal_constant: constant,
            ..Default::default()
        };

        // 1. baseline
        let mut signal = reading.magnitude;
        if active(CalibrationKind::Autobalance) {
            let autobalance = self.autobalance();
            signal = autobalance.apply(signal);
            corrections.baseline = autobalance.baseline;
        }

        // 2. gain
        if active(CalibrationKind::Frequency) {
            if let Some(gain) = self.frequency().gain_for(reading.frequency_hz()) {
                signal *= gain;
                corrections.frequency_gain = Some(gain);
            }
        }

        // 3. temperature
        if self.is_enabled(CalibrationKind::Temperature) {
            let factor = self
                .temperature()
                .factor(reading.sample.device_temperature_c);
            signal *= factor;
            corrections.temperature_factor = Some(factor);
        }

        // 4. position, XY then XZ
        let mut position = observed;
        for (kind, plane) in [(CalibrationKind::Xy, Plane::Xy), (CalibrationKind::Xz, Plane::Xz)] {
            if !active(kind) {
                continue;
            }
            let offset = self.spatial(plane).correction(position);
            position = position + offset;
            match plane {
                Plane::Xy => corrections.xy_offset = Some(offset),
                Plane::Xz => corrections.xz_offset = Some(offset),
            }
        }

        // 5. constant and depth
        let calibrated = calibrated_signal(signal, constant);
        let corrected_depth = depth_from_signal(signal, constant, reading.attenuation_factor);

        CalibratedReading {
            reading: reading.clone(),
            corrected_signal_strength: signal,
            calibrated_signal: calibrated,
            corrected_depth,
            observed_position: observed,
            corrected_position: position,
            corrections,
        }
    }

    /// Apply the current state again, starting from the wrapped reading
    pub fn recalibrate(&self, calibrated: &CalibratedReading) -> CalibratedReading {
        self.calibrate(&calibrated.reading, calibrated.observed_position)
    }
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::new(CalibrationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::FrequencyGain;
    use crate::signal::{RawSample, SignalEngine};
    use approx::assert_relative_eq;
    use chrono::Utc;
    use tempfile::TempDir;

    fn reading(magnitude: f64, temperature: Option<f32>) -> Reading {
        let sample = RawSample::new(Utc::now(), 19_000.0, magnitude, 0.0)
            .with_device_state(None, temperature);
        SignalEngine::default().process_single(sample)
    }

    fn grid(plane: Plane) -> SpatialCalibration {
        SpatialCalibration::from_points(
            plane,
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 1.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
        )
    }

    #[test]
    fn test_uncalibrated_passthrough() {
        let store = CalibrationStore::default();
        let r = reading(150.0, None);
        let c = store.calibrate(&r, Point3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(c.corrected_signal_strength, 150.0);
        assert_relative_eq!(c.corrected_depth, r.depth_meters);
        assert_eq!(c.corrected_position, Point3::new(1.0, 2.0, 3.0));
        assert_eq!(c.corrections.baseline, None);
        assert_eq!(c.corrections.temperature_factor, Some(1.0));
        assert_relative_eq!(c.corrections.signal_constant, 3333.0);
    }

    #[test]
    fn test_fixed_order() {
        let store = CalibrationStore::default();
        store.set_autobalance(AutobalanceCalibration {
            baseline: Some(50.0),
        });
        store.set_frequency(FrequencyCalibration {
            gains: vec![FrequencyGain {
                frequency_hz: 19_000.0,
                gain: 2.0,
            }],
            ..Default::default()
        });

        let c = store.calibrate(&reading(150.0, Some(35.0)), Point3::ORIGIN);
        // (150 - 50) * 2 * 1.02
        assert_relative_eq!(c.corrected_signal_strength, 204.0, epsilon = 1e-9);
        assert_relative_eq!(c.calibrated_signal, 204.0 * 3.333, epsilon = 1e-9);
        assert_relative_eq!(
            c.corrected_depth,
            depth_from_signal(204.0, 3333.0, 0.417),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_disabled_kind_skipped() {
        let store = CalibrationStore::default();
        store.set_autobalance(AutobalanceCalibration {
            baseline: Some(100.0),
        });
        store.set_enabled(CalibrationKind::Autobalance, false);
        let c = store.calibrate(&reading(150.0, None), Point3::ORIGIN);
        assert_relative_eq!(c.corrected_signal_strength, 150.0);
        assert!(store.status()[&CalibrationKind::Autobalance].calibrated);
        assert!(!store.status()[&CalibrationKind::Autobalance].active());
    }

    #[test]
    fn test_idempotent() {
        let store = CalibrationStore::default();
        store.set_autobalance(AutobalanceCalibration {
            baseline: Some(20.0),
        });
        store.set_spatial(grid(Plane::Xy));
        store.set_spatial(grid(Plane::Xz));
        let first = store.calibrate(&reading(400.0, Some(18.0)), Point3::new(0.2, 0.3, 0.4));
        let second = store.recalibrate(&first);
        assert_eq!(first, second);
    }

    #[test]
    fn test_xy_then_xz() {
        let store = CalibrationStore::default();
        store.set_spatial(grid(Plane::Xy));
        store.set_spatial(grid(Plane::Xz));
        let observed = Point3::new(0.4, 0.4, 0.4);
        let c = store.calibrate(&reading(100.0, None), observed);

        let after_xy = grid(Plane::Xy).apply(observed);
        let after_xz = grid(Plane::Xz).apply(after_xy);
        assert_eq!(c.corrected_position, after_xz);
        assert!(c.corrections.xy_offset.is_some());
        assert!(c.corrections.xz_offset.is_some());
    }

    #[test]
    fn test_reset_kinds() {
        let store = CalibrationStore::default();
        store.set_spatial(grid(Plane::Xy));
        store.set_autobalance(AutobalanceCalibration {
            baseline: Some(1.0),
        });
        store.reset(CalibrationKind::Xy);
        assert!(!store.is_calibrated(CalibrationKind::Xy));
        assert!(store.is_calibrated(CalibrationKind::Autobalance));

        store.reset_all();
        let status = store.status();
        assert_eq!(status.len(), 5);
        assert!(status[&CalibrationKind::Temperature].calibrated);
        assert!(!status[&CalibrationKind::Autobalance].calibrated);
        assert!(!status[&CalibrationKind::Frequency].calibrated);
    }

    #[test]
    fn test_export_requires_calibration() {
        let store = CalibrationStore::default();
        assert!(matches!(
            store.export_state(CalibrationKind::Frequency),
            Err(CalibrationError::NoCalibrationLoaded(CalibrationKind::Frequency))
        ));
        assert!(store.export_state(CalibrationKind::Temperature).is_ok());
    }

    #[test]
    fn test_state_round_trip_same_corrections() {
        let store = CalibrationStore::default();
        store.set_spatial(grid(Plane::Xy));
        store.set_temperature(TemperatureCalibration::new(20.0, 0.004));
        store.set_frequency(FrequencyCalibration {
            gains: vec![FrequencyGain {
                frequency_hz: 19_000.0,
                gain: 1.25,
            }],
            ..Default::default()
        });

        let r = reading(321.0, Some(12.5));
        let at = Point3::new(0.7, 0.1, 0.0);
        let before = store.calibrate(&r, at);

        let reloaded = CalibrationStore::default();
        for kind in [
            CalibrationKind::Xy,
            CalibrationKind::Temperature,
            CalibrationKind::Frequency,
        ] {
            reloaded
                .import_state(kind, &store.export_state(kind).unwrap())
                .unwrap();
        }
        assert_eq!(reloaded.calibrate(&r, at), before);
    }

    #[test]
    fn test_import_wrong_plane() {
        let store = CalibrationStore::default();
        let json = serde_json::to_string(&grid(Plane::Xz)).unwrap();
        assert!(matches!(
            store.import_state(CalibrationKind::Xy, &json),
            Err(CalibrationError::PlaneTagMismatch { .. })
        ));
        assert!(!store.is_calibrated(CalibrationKind::Xy));
    }

    #[test]
    fn test_load_cal_file_and_tag_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grid.cal");
        std::fs::write(&path, "calXY\n14.06.2023 10:00\n0;0;0\n1;0;0\n0;1;0\n").unwrap();

        let store = CalibrationStore::default();
        store.load_calibration(CalibrationKind::Xy, &path).unwrap();
        assert_eq!(store.spatial(Plane::Xy).points.len(), 3);

        let err = store.load_calibration(CalibrationKind::Xz, &path).unwrap_err();
        assert!(matches!(err, CalibrationError::PlaneTagMismatch { .. }));
        assert!(store.spatial(Plane::Xz).points.is_empty());
    }

    #[test]
    fn test_save_and_load_json_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("autobalance.json");

        let store = CalibrationStore::default();
        store.set_autobalance(AutobalanceCalibration {
            baseline: Some(104.5),
        });
        store.save_state(CalibrationKind::Autobalance, &path).unwrap();

        let other = CalibrationStore::default();
        other
            .load_calibration(CalibrationKind::Autobalance, &path)
            .unwrap();
        assert_eq!(other.autobalance().baseline, Some(104.5));
    }

    #[test]
    fn test_snapshot_restore() {
        let store = CalibrationStore::default();
        store.set_spatial(grid(Plane::Xz));
        store.set_enabled(CalibrationKind::Frequency, false);
        let snapshot = store.snapshot();

        let other = CalibrationStore::default();
        other.restore(&snapshot);
        assert_eq!(other.snapshot(), snapshot);
        assert!(!other.is_enabled(CalibrationKind::Frequency));
    }
}
