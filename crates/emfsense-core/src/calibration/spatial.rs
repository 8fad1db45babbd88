//! XY and XZ spatial correction
//!
//! A set of reference points surveyed on a grid. The correction for an
//! observed position is the inverse-distance-weighted mean of the offsets
//! from the observed position to its nearest reference points, measured and
//! applied in the plane's two axes only. The third axis is left untouched.

use super::CalibrationError;
use crate::codec::{cal, CalFile, Plane, Point3};
use serde::{Deserialize, Serialize};

/// Reference points blended per correction
pub const DEFAULT_NEIGHBOURS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialCalibration {
    pub plane: Plane,
    pub timestamp: Option<String>,
    pub points: Vec<Point3>,
    #[serde(default = "default_neighbours")]
    pub neighbours: usize,
}

fn default_neighbours() -> usize {
    DEFAULT_NEIGHBOURS
}

impl SpatialCalibration {
    /// No reference points
    pub fn empty(plane: Plane) -> Self {
        Self {
            plane,
            timestamp: None,
            points: Vec::new(),
            neighbours: DEFAULT_NEIGHBOURS,
        }
    }

    pub fn from_points(plane: Plane, points: Vec<Point3>) -> Self {
        Self {
            points,
            ..Self::empty(plane)
        }
    }

    /// Load from `.cal` text; the tag line must name `plane`
    pub fn from_cal_text(plane: Plane, text: &str) -> Result<Self, CalibrationError> {
        let found = cal::first_line(text).unwrap_or_default();
        if found != plane.tag() {
            return Err(CalibrationError::PlaneTagMismatch {
                expected: plane.tag().to_string(),
                found: found.to_string(),
            });
        }
        let file = cal::parse_cal(text)?;
        Ok(Self::from_cal_file(file))
    }

    pub fn from_cal_file(file: CalFile) -> Self {
        Self {
            plane: file.plane,
            timestamp: file.timestamp,
            points: file.points,
            neighbours: DEFAULT_NEIGHBOURS,
        }
    }

    pub fn with_neighbours(mut self, neighbours: usize) -> Self {
        self.neighbours = neighbours.max(1);
        self
    }

    pub fn is_calibrated(&self) -> bool {
        !self.points.is_empty()
    }

    /// The plane's two axes of a point
    fn project(&self, p: &Point3) -> (f64, f64) {
        match self.plane {
            Plane::Xy => (p.x, p.y),
            Plane::Xz => (p.x, p.z),
        }
    }

    /// Offset to add to `observed`; zero with fewer points than neighbours
    pub fn correction(&self, observed: Point3) -> Point3 {
        let k = self.neighbours.max(1);
        if self.points.len() < k {
            return Point3::ORIGIN;
        }

        let (ox, oy) = self.project(&observed);
        let mut by_distance: Vec<(f64, f64, f64)> = self
            .points
            .iter()
            .map(|p| {
                let (px, py) = self.project(p);
                let (dx, dy) = (px - ox, py - oy);
                (dx.hypot(dy), dx, dy)
            })
            .collect();
        by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut weight_sum = 0.0;
        let (mut sum_a, mut sum_b) = (0.0, 0.0);
        for &(distance, dx, dy) in by_distance.iter().take(k) {
            let weight = if distance == 0.0 { 1.0 } else { 1.0 / distance };
            weight_sum += weight;
            sum_a += weight * dx;
            sum_b += weight * dy;
        }
        let (a, b) = (sum_a / weight_sum, sum_b / weight_sum);

        match self.plane {
            Plane::Xy => Point3::new(a, b, 0.0),
            Plane::Xz => Point3::new(a, 0.0, b),
        }
    }

    /// `observed` moved by its correction
    pub fn apply(&self, observed: Point3) -> Point3 {
        observed + self.correction(observed)
    }
}
