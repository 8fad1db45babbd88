//! Running statistics over calibrated readings
//!
//! Keeps a bounded full-resolution history and a down-sampled archive of
//! depth and signal, plus counters for the monitoring display.

use crate::calibration::CalibratedReading;
use crate::signal::MaterialClass;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// Full-resolution history (6 minutes at 10 Hz)
const MAX_HISTORY_SIZE: usize = 3600;

/// Down-sampled archive (every 10th reading, 2.4 hours at 10 Hz)
const MAX_ARCHIVE_SIZE: usize = 8640;

/// Archive every Nth reading
const ARCHIVE_EVERY: u64 = 10;

/// One point of the depth/signal history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepthPoint {
    pub timestamp: DateTime<Utc>,
    pub frequency_hz: f64,
    pub depth_m: f64,
    pub signal: f64,
    pub quality: f64,
}

/// A loss of the device link during monitoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkLossEvent {
    pub timestamp: DateTime<Utc>,
    /// Samples received before the link went away
    pub readings_before: u64,
}

/// Aggregates derived from the history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunningStats {
    pub current_depth: f64,
    pub min_depth: f64,
    pub max_depth: f64,
    /// Mean depth over the full-resolution history
    pub avg_depth: f64,
    pub current_signal: f64,
    pub avg_quality: f64,
    pub reading_count: u64,
    /// Readings skipped because the consumer fell behind the stream
    pub dropped_samples: u64,
    pub link_losses: u64,
    pub materials: BTreeMap<MaterialClass, u64>,
}

impl RunningStats {
    /// Most frequently seen material, if any
    pub fn dominant_material(&self) -> Option<MaterialClass> {
        self.materials
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(material, _)| *material)
    }
}

#[derive(Debug)]
pub struct ReadingStats {
    history: VecDeque<DepthPoint>,
    archive: VecDeque<DepthPoint>,
    link_losses: Vec<LinkLossEvent>,
    max_size: usize,
    max_archive_size: usize,
    stats: RunningStats,
    archive_counter: u64,
}

impl ReadingStats {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
            archive: VecDeque::with_capacity(MAX_ARCHIVE_SIZE),
            link_losses: Vec::new(),
            max_size: MAX_HISTORY_SIZE,
            max_archive_size: MAX_ARCHIVE_SIZE,
            stats: RunningStats {
                min_depth: f64::MAX,
                ..Default::default()
            },
            archive_counter: 0,
        }
    }

    /// Record one calibrated reading
    pub fn record(&mut self, reading: &CalibratedReading) {
        let point = DepthPoint {
            timestamp: reading.reading.timestamp(),
            frequency_hz: reading.reading.frequency_hz(),
            depth_m: reading.corrected_depth,
            signal: reading.corrected_signal_strength,
            quality: reading.reading.quality_score,
        };

        if self.history.len() >= self.max_size {
            self.history.pop_front();
        }
        self.history.push_back(point.clone());

        self.archive_counter += 1;
        if self.archive_counter.is_multiple_of(ARCHIVE_EVERY) {
            if self.archive.len() >= self.max_archive_size {
                self.archive.pop_front();
            }
            self.archive.push_back(point.clone());
        }

        let stats = &mut self.stats;
        stats.current_depth = point.depth_m;
        stats.current_signal = point.signal;
        stats.min_depth = stats.min_depth.min(point.depth_m);
        stats.max_depth = stats.max_depth.max(point.depth_m);
        stats.reading_count += 1;
        *stats
            .materials
            .entry(reading.reading.material_class)
            .or_insert(0) += 1;

        let n = self.history.len() as f64;
        stats.avg_depth = self.history.iter().map(|p| p.depth_m).sum::<f64>() / n;
        stats.avg_quality = self.history.iter().map(|p| p.quality).sum::<f64>() / n;
    }

    /// Count readings lost to stream lag
    pub fn record_dropped(&mut self, count: u64) {
        self.stats.dropped_samples += count;
    }

    pub fn record_link_loss(&mut self) {
        self.link_losses.push(LinkLossEvent {
            timestamp: Utc::now(),
            readings_before: self.stats.reading_count,
        });
        self.stats.link_losses += 1;
    }

    pub fn history(&self) -> &VecDeque<DepthPoint> {
        &self.history
    }

    pub fn archive(&self) -> &VecDeque<DepthPoint> {
        &self.archive
    }

    pub fn link_losses(&self) -> &[LinkLossEvent] {
        &self.link_losses
    }

    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }

    /// Last `count` depths as (seconds before now, depth) pairs, newest first
    pub fn depth_plot_data(&self, count: usize) -> Vec<(f64, f64)> {
        let now = Utc::now();
        self.history
            .iter()
            .rev()
            .take(count)
            .map(|p| {
                let offset = (now - p.timestamp).num_milliseconds() as f64 / 1000.0;
                (-offset, p.depth_m)
            })
            .collect()
    }

    /// Reset counters and aggregates, keeping the history for display
    pub fn reset_counters(&mut self) {
        self.stats = RunningStats {
            min_depth: f64::MAX,
            ..Default::default()
        };
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.archive.clear();
        self.link_losses.clear();
        self.archive_counter = 0;
        self.reset_counters();
    }
}

impl Default for ReadingStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationStore;
    use crate::codec::Point3;
    use crate::signal::{RawSample, SignalEngine};
    use approx::assert_relative_eq;

    fn calibrated(magnitude: f64) -> CalibratedReading {
        let sample = RawSample::new(Utc::now(), 19_000.0, magnitude, 0.0);
        let reading = SignalEngine::default().process_single(sample);
        CalibrationStore::default().calibrate(&reading, Point3::ORIGIN)
    }

    #[test]
    fn test_store_creation() {
        let store = ReadingStats::new();
        assert!(store.history().is_empty());
        assert_eq!(store.stats().reading_count, 0);
    }

    #[test]
    fn test_record_reading() {
        let mut store = ReadingStats::new();
        let shallow = calibrated(250.0);
        let deep = calibrated(40.0);
        store.record(&shallow);
        store.record(&deep);

        let stats = store.stats();
        assert_eq!(stats.reading_count, 2);
        assert_relative_eq!(stats.min_depth, shallow.corrected_depth);
        assert_relative_eq!(stats.max_depth, deep.corrected_depth);
        assert_relative_eq!(
            stats.avg_depth,
            (shallow.corrected_depth + deep.corrected_depth) / 2.0
        );
        assert_relative_eq!(stats.current_depth, deep.corrected_depth);
        assert_eq!(stats.materials.values().sum::<u64>(), 2);
    }

    #[test]
    fn test_history_limit_and_archive() {
        let mut store = ReadingStats::new();
        let r = calibrated(100.0);
        for _ in 0..MAX_HISTORY_SIZE + 100 {
            store.record(&r);
        }
        assert_eq!(store.history().len(), MAX_HISTORY_SIZE);
        assert_eq!(store.archive().len(), (MAX_HISTORY_SIZE + 100) / 10);
    }

    #[test]
    fn test_dropped_and_link_loss() {
        let mut store = ReadingStats::new();
        store.record(&calibrated(100.0));
        store.record_dropped(7);
        store.record_dropped(3);
        store.record_link_loss();
        assert_eq!(store.stats().dropped_samples, 10);
        assert_eq!(store.stats().link_losses, 1);
        assert_eq!(store.link_losses()[0].readings_before, 1);
    }

    #[test]
    fn test_clear() {
        let mut store = ReadingStats::new();
        store.record(&calibrated(100.0));
        store.clear();
        assert!(store.history().is_empty());
        assert_eq!(store.stats().reading_count, 0);
        assert_eq!(store.stats().min_depth, f64::MAX);
    }

    #[test]
    fn test_dominant_material() {
        let mut stats = RunningStats::default();
        assert_eq!(stats.dominant_material(), None);
        stats.materials.insert(MaterialClass::Sand, 3);
        stats.materials.insert(MaterialClass::Clay, 5);
        assert_eq!(stats.dominant_material(), Some(MaterialClass::Clay));
    }
}
