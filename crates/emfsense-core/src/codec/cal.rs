//! CAL spatial reference files
//!
//! ```text
//! calXY
//! 2023-06-14 10:12:00
//! 0;0;0
//! 1,5;0;0
//! ```
//!
//! The first line names the plane. The second is a free-form timestamp; if
//! it already parses as a point it is treated as one.

use super::{text, CodecError, FileFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Plane {
    Xy,
    Xz,
}

impl Plane {
    /// First-line tag of a `.cal` file for this plane
    pub fn tag(self) -> &'static str {
        match self {
            Plane::Xy => "calXY",
            Plane::Xz => "calXZ",
        }
    }

    /// Exact match; surrounding whitespace is not a tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "calXY" => Some(Plane::Xy),
            "calXZ" => Some(Plane::Xz),
            _ => None,
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const ORIGIN: Point3 = Point3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Parse an `x;y;z` line
    pub fn parse(line: &str) -> Option<Self> {
        match text::fields(line).as_slice() {
            [x, y, z] => Some(Self {
                x: text::parse_decimal(x)?,
                y: text::parse_decimal(y)?,
                z: text::parse_decimal(z)?,
            }),
            _ => None,
        }
    }
}

impl Add for Point3 {
    type Output = Point3;

    fn add(self, rhs: Point3) -> Point3 {
        Point3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

/// A parsed `.cal` file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalFile {
    pub plane: Plane,
    pub timestamp: Option<String>,
    pub points: Vec<Point3>,
    /// Point lines dropped as malformed
    pub skipped_lines: usize,
}

/// First line of a `.cal` file as written, without its line ending
pub fn first_line(input: &str) -> Option<&str> {
    text::numbered_lines(input)
        .into_iter()
        .next()
        .map(|(_, line)| line)
        .filter(|line| !line.is_empty())
}

/// Parse a `.cal` file; the plane comes from its tag line
pub fn parse_cal(input: &str) -> Result<CalFile, CodecError> {
    let Some(tag) = first_line(input) else {
        return Err(CodecError::HeaderMissing {
            format: FileFormat::Cal,
            detail: "empty file".to_string(),
        });
    };
    let plane = Plane::from_tag(tag).ok_or_else(|| CodecError::HeaderMissing {
        format: FileFormat::Cal,
        detail: format!("`{tag}` is not a plane tag"),
    })?;

    let lines: Vec<(usize, &str)> = text::numbered_lines(input)
        .into_iter()
        .skip(1)
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();

    let mut rest = lines.as_slice();
    let mut timestamp = None;
    if let Some(((_, second), tail)) = rest.split_first() {
        if Point3::parse(second).is_none() {
            timestamp = Some(second.trim().to_string());
            rest = tail;
        }
    }

    let mut points = Vec::with_capacity(rest.len());
    let mut skipped_lines = 0;
    for (line_no, line) in rest {
        match Point3::parse(line) {
            Some(point) => points.push(point),
            None => {
                tracing::warn!(line = line_no, "Skipping malformed calibration point");
                skipped_lines += 1;
            }
        }
    }

    Ok(CalFile {
        plane,
        timestamp,
        points,
        skipped_lines,
    })
}

pub fn write_cal(file: &CalFile) -> String {
    let mut out = String::new();
    out.push_str(file.plane.tag());
    out.push('\n');
    if let Some(ts) = &file.timestamp {
        out.push_str(ts);
        out.push('\n');
    }
    for p in &file.points {
        out.push_str(&format!(
            "{};{};{}\n",
            text::format_decimal(p.x),
            text::format_decimal(p.y),
            text::format_decimal(p.z)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_timestamp() {
        let cal = parse_cal("calXZ\n2023-06-14 10:12:00\n0;0;0\n1,5;0;-2\nbad\n").unwrap();
        assert_eq!(cal.plane, Plane::Xz);
        assert_eq!(cal.timestamp.as_deref(), Some("2023-06-14 10:12:00"));
        assert_eq!(cal.points, vec![Point3::ORIGIN, Point3::new(1.5, 0.0, -2.0)]);
        assert_eq!(cal.skipped_lines, 1);
    }

    #[test]
    fn test_second_line_point() {
        let cal = parse_cal("calXY\r\n1;2;3\r\n4;5;6\r\n").unwrap();
        assert!(cal.timestamp.is_none());
        assert_eq!(cal.points.len(), 2);
    }

    #[test]
    fn test_missing_tag() {
        assert!(matches!(
            parse_cal("calYZ\n1;2;3\n"),
            Err(CodecError::HeaderMissing { .. })
        ));
        assert!(parse_cal("").is_err());
        assert_eq!(first_line("calXZ\r\n1;2;3"), Some("calXZ"));
    }

    #[test]
    fn test_tag_must_be_first_line_verbatim() {
        assert_eq!(first_line("\ncalXZ\n1;2;3"), None);
        assert_eq!(first_line(" calXZ\n1;2;3"), Some(" calXZ"));
        for input in ["\ncalXZ\n1;2;3\n", " calXZ\n1;2;3\n", "calXZ \n1;2;3\n"] {
            assert!(
                matches!(parse_cal(input), Err(CodecError::HeaderMissing { .. })),
                "accepted {input:?}"
            );
        }
    }

    #[test]
    fn test_writer_output_parses_back() {
        let file = CalFile {
            plane: Plane::Xy,
            timestamp: Some("14.06.2023".to_string()),
            points: vec![Point3::new(0.25, -1.0, 3.0), Point3::new(2.0, 2.0, 0.0)],
            skipped_lines: 0,
        };
        assert_eq!(parse_cal(&write_cal(&file)).unwrap(), file);
    }
}
