//! E2E tests for survey and calibration files
//!
//! Writes legacy files to a temp directory and reads them back through
//! `Instrument::parse_file` and `Instrument::load_calibration`.

use approx::assert_relative_eq;
use emfsense::calibration::CalibrationError;
use emfsense::codec::{self, CodecError, ParsedFile};
use emfsense::{CalibrationKind, FileFormat, Instrument, InstrumentError, Point3};
use std::path::PathBuf;
use tempfile::TempDir;

const GGA: &str = "$GPGGA,101502,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Header plus three one-frequency data lines yields three readings, each
/// located by the GGA sentence in its last field
#[test]
fn test_egd_three_lines_three_readings_with_gps() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "north.egd",
        &format!(
            "version;3.1\r\ncomment;north field\r\nfrequencycount;1\r\ndatastart;\r\n\
             14.06.2023;10:15:02;812,5;-240,25;{GGA}\r\n\
             14.06.2023;10:15:03;800;-230;{GGA}\r\n\
             14.06.2023;10:15:04;790,5;-220;{GGA}\r\n"
        ),
    );

    let instrument = Instrument::default();
    let readings = instrument.parse_file(&path, None).unwrap();
    assert_eq!(readings.len(), 3);
    for reading in &readings {
        assert_eq!(reading.frequency_hz(), 19_000.0);
        let location = reading.sample.location.expect("GPS missing");
        assert_relative_eq!(location.latitude, 48.1173, epsilon = 1e-4);
        assert_relative_eq!(location.longitude, 11.516_67, epsilon = 1e-4);
        assert_relative_eq!(location.altitude_m, 545.4);
    }
    assert_relative_eq!(readings[1].raw_magnitude, (800.0f64).hypot(230.0));
}

/// Format override wins over the extension
#[test]
fn test_format_override() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "survey.txt",
        "date;03.09.2022\nfrequencycount;2\nstart of field;\n\
         09:00:00;10;20;30;40\nend of profile;\n09:01:00;12;22;32;42\n",
    );

    let instrument = Instrument::default();
    assert!(matches!(
        instrument.parse_file(&path, None),
        Err(InstrumentError::Codec(CodecError::UnknownFormat(_)))
    ));

    let readings = instrument.parse_file(&path, Some(FileFormat::Esd)).unwrap();
    assert_eq!(readings.len(), 4);
    assert_eq!(readings[0].sample.profile, Some(1));
    assert_eq!(readings[3].sample.profile, Some(2));
}

/// FADS settings are not readings
#[test]
fn test_fads_is_not_a_reading_stream() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "unit.fads", "120;1\n80,5;0\n3\n7\n");

    let instrument = Instrument::default();
    assert!(matches!(
        instrument.parse_file(&path, None),
        Err(InstrumentError::Codec(CodecError::NotAReadingStream(
            FileFormat::Fads
        )))
    ));

    match codec::parse_file(&path, None).unwrap() {
        ParsedFile::Fads(settings) => {
            assert_relative_eq!(settings.thresholds[0].threshold, 120.0);
            assert!(settings.thresholds[0].enabled);
            assert!(!settings.thresholds[1].enabled);
            assert_eq!(settings.parameters, [3, 7]);
        }
        other => panic!("unexpected {other:?}"),
    }
}

/// A CAL file tagged for the other plane is rejected and loads nothing
#[test]
fn test_cal_tag_mismatch_loads_zero_points() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "grid.cal", "calXZ\n2023-06-14\n0;0;0\n1;0;0\n0;0;1\n");

    let instrument = Instrument::default();
    let err = instrument
        .load_calibration(CalibrationKind::Xy, &path)
        .unwrap_err();
    assert!(matches!(
        err,
        InstrumentError::Calibration(CalibrationError::PlaneTagMismatch { .. })
    ));
    assert!(instrument.calibration_store().spatial(emfsense::Plane::Xy).points.is_empty());
    assert!(!instrument.calibration_status()[&CalibrationKind::Xy].calibrated);

    instrument
        .load_calibration(CalibrationKind::Xz, &path)
        .unwrap();
    assert!(instrument.calibration_status()[&CalibrationKind::Xz].calibrated);
}

/// A loaded XY grid moves file readings toward the reference points
#[test]
fn test_spatial_calibration_on_file_readings() {
    let dir = TempDir::new().unwrap();
    let cal = write(
        &dir,
        "xy.cal",
        "calXY\n14.06.2023\n1;1;0\n2;1;0\n1;2;0\n",
    );
    let survey = write(
        &dir,
        "line.egd",
        "frequencycount;1\ndatastart;\n14.06.2023;10:15:02;300;400\n",
    );

    let instrument = Instrument::default();
    instrument.load_calibration(CalibrationKind::Xy, &cal).unwrap();
    let readings = instrument.parse_file(&survey, None).unwrap();

    let calibrated = instrument.calibrate_reading(&readings[0], Point3::new(0.0, 0.0, 2.0));
    assert!(calibrated.corrected_position.x > 0.0);
    assert!(calibrated.corrected_position.y > 0.0);
    assert_eq!(calibrated.corrected_position.z, 2.0);
    assert!(calibrated.corrections.xy_offset.is_some());
    assert!(calibrated.corrections.xz_offset.is_none());
}
