//! NMEA GGA sentence decoding
//!
//! Survey data lines end with the GGA sentence the logger's GPS emitted at
//! that moment. Only position, altitude, fix quality and satellite count are
//! kept. A sentence that cannot be decoded yields a zero fix rather than an
//! error; the data line itself is still valid.

use crate::signal::GeoPosition;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GpsFix {
    /// Decimal degrees, south negative
    pub latitude: f64,
    /// Decimal degrees, west negative
    pub longitude: f64,
    pub altitude_m: f64,
    pub fix_quality: u8,
    pub satellites: u8,
}

impl GpsFix {
    /// False for the zero fix returned on malformed input
    pub fn is_valid(&self) -> bool {
        self.fix_quality > 0 || self.latitude != 0.0 || self.longitude != 0.0
    }

    pub fn position(&self) -> GeoPosition {
        GeoPosition {
            latitude: self.latitude,
            longitude: self.longitude,
            altitude_m: self.altitude_m,
        }
    }
}

/// Decode a `$GPGGA` (or `$GNGGA`) sentence
pub fn parse_gpgga(sentence: &str) -> GpsFix {
    decode(sentence).unwrap_or_else(|| {
        tracing::debug!(sentence, "Undecodable GGA sentence");
        GpsFix::default()
    })
}

fn decode(sentence: &str) -> Option<GpsFix> {
    let body = sentence.trim();
    let body = body.split('*').next().unwrap_or(body);
    let fields: Vec<&str> = body.split(',').collect();

    let talker = fields.first()?.trim_start_matches('$');
    if !talker.ends_with("GGA") || fields.len() < 10 {
        return None;
    }

    let mut latitude = degrees_minutes(fields[2], 2)?;
    match fields[3] {
        "N" => {}
        "S" => latitude = -latitude,
        _ => return None,
    }

    let mut longitude = degrees_minutes(fields[4], 3)?;
    match fields[5] {
        "E" => {}
        "W" => longitude = -longitude,
        _ => return None,
    }

    Some(GpsFix {
        latitude,
        longitude,
        fix_quality: fields[6].parse().unwrap_or(0),
        satellites: fields[7].parse().unwrap_or(0),
        altitude_m: fields[9].parse().unwrap_or(0.0),
    })
}

/// `ddmm.mmmm` (or `dddmm.mmmm`) to decimal degrees
fn degrees_minutes(field: &str, degree_digits: usize) -> Option<f64> {
    if field.len() < degree_digits + 2 || !field.is_char_boundary(degree_digits) {
        return None;
    }
    let (deg, min) = field.split_at(degree_digits);
    let degrees: f64 = deg.parse().ok()?;
    let minutes: f64 = min.parse().ok()?;
    if minutes >= 60.0 {
        return None;
    }
    Some(degrees + minutes / 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_northern_eastern() {
        let fix = parse_gpgga("$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47");
        assert_relative_eq!(fix.latitude, 48.1173, epsilon = 1e-4);
        assert_relative_eq!(fix.longitude, 11.516_666, epsilon = 1e-4);
        assert_relative_eq!(fix.altitude_m, 545.4);
        assert_eq!(fix.satellites, 8);
        assert_eq!(fix.fix_quality, 1);
        assert!(fix.is_valid());
    }

    #[test]
    fn test_south_west_negate() {
        let fix = parse_gpgga("$GNGGA,000000,3351.500,S,15112.000,W,2,11,1.0,12.0,M,,M,,");
        assert_relative_eq!(fix.latitude, -33.858_333, epsilon = 1e-5);
        assert_relative_eq!(fix.longitude, -151.2, epsilon = 1e-9);
    }

    #[test]
    fn test_malformed_yields_zero() {
        for bad in [
            "",
            "garbage",
            "$GPRMC,1,2,3",
            "$GPGGA,1,xx,N,yy,E,1,1,1,1,M",
            "$GPGGA,1,4807.0,Q,01131.0,E,1,1,1,1",
        ] {
            let fix = parse_gpgga(bad);
            assert_eq!((fix.latitude, fix.longitude), (0.0, 0.0), "{bad}");
            assert!(!fix.is_valid());
        }
    }
}
