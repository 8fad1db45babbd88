//! Legacy survey file codecs
//!
//! Parsers and writers for the four text formats the handheld logger
//! produced:
//! - EGD grid surveys ([`egd`])
//! - ESD profile surveys ([`esd`])
//! - FADS threshold settings ([`fads`])
//! - CAL spatial reference points ([`cal`])
//!
//! EGD and ESD parse into a [`Survey`] whose [`Survey::samples`] are the
//! same [`RawSample`]s the transport layer produces.

pub mod cal;
pub mod egd;
pub mod esd;
pub mod fads;
pub mod gps;
pub mod text;

use crate::signal::{RawSample, CARRIER_FREQUENCIES};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub use cal::{parse_cal, write_cal, CalFile, Plane, Point3};
pub use egd::{parse_egd, write_egd};
pub use esd::{parse_esd, write_esd};
pub use fads::{parse_fads, write_fads, FadsSettings, ThresholdSetting};
pub use gps::{parse_gpgga, GpsFix};

/// Errors that can occur while reading a survey file
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("{format} header missing: {detail}")]
    HeaderMissing { format: FileFormat, detail: String },

    #[error("Line {line}: {reason}")]
    DataLineMalformed { line: usize, reason: String },

    #[error("{format} file truncated: expected {expected} lines, found {found}")]
    Truncated {
        format: FileFormat,
        expected: usize,
        found: usize,
    },

    #[error("Cannot infer file format from {0}")]
    UnknownFormat(String),

    #[error("{0} files do not contain readings")]
    NotAReadingStream(FileFormat),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileFormat {
    Egd,
    Esd,
    Fads,
    Cal,
}

impl FileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Egd => "egd",
            FileFormat::Esd => "esd",
            FileFormat::Fads => "fads",
            FileFormat::Cal => "cal",
        }
    }

    /// Infer the format from a file extension (case-insensitive)
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::from_name(&ext)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "egd" => Some(FileFormat::Egd),
            "esd" => Some(FileFormat::Esd),
            "fads" => Some(FileFormat::Fads),
            "cal" => Some(FileFormat::Cal),
            _ => None,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.extension().to_ascii_uppercase())
    }
}

/// `key;value...` header shared by EGD and ESD
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyHeader {
    pub version: Option<String>,
    pub comment: Option<String>,
    pub amp_mode: Option<String>,
    pub orientation: Option<String>,
    /// Survey date (ESD data lines carry only a time)
    pub date: Option<NaiveDate>,
    /// Per-frequency raw offsets
    pub offsets: Vec<f64>,
    /// Per-frequency gains
    pub gains: Vec<f64>,
    /// Declared frequency count
    pub frequency_count: Option<usize>,
    /// Explicit frequency list, when the file carries one
    pub frequencies: Vec<f64>,
    /// Keys this codec does not interpret, kept for writing back
    pub extra: Vec<(String, String)>,
}

impl SurveyHeader {
    /// Absorb one header line. Unparseable numbers are skipped with a warning.
    pub(crate) fn apply_line(&mut self, line_no: usize, line: &str) {
        let fields = text::fields(line);
        let Some((key, values)) = fields.split_first() else {
            return;
        };
        let joined = values.join(";");
        match key.to_ascii_lowercase().as_str() {
            "version" => self.version = Some(joined),
            "comment" => self.comment = Some(joined),
            "ampmode" => self.amp_mode = Some(joined),
            "orientation" => self.orientation = Some(joined),
            "date" => self.date = parse_date(&joined),
            "offset" | "offsets" => self.offsets = numbers(line_no, values),
            "gain" | "gains" => self.gains = numbers(line_no, values),
            "frequencies" => self.frequencies = numbers(line_no, values),
            "frequencycount" | "freqcount" | "numfreq" => {
                self.frequency_count = values.first().and_then(|v| v.parse().ok());
            }
            _ => self.extra.push((key.to_string(), joined)),
        }
    }

    /// Frequencies in data-column order
    ///
    /// The explicit list wins; otherwise the first `frequency_count` table
    /// frequencies; otherwise `pairs` inferred from the data line.
    pub fn resolved_frequencies(&self, pairs: usize) -> Vec<f64> {
        if !self.frequencies.is_empty() {
            return self.frequencies.clone();
        }
        let count = self.frequency_count.unwrap_or(pairs).min(CARRIER_FREQUENCIES.len());
        CARRIER_FREQUENCIES[..count].to_vec()
    }

    /// Number of I/Q pairs each data line must carry, if declared
    pub fn expected_pairs(&self) -> Option<usize> {
        if !self.frequencies.is_empty() {
            Some(self.frequencies.len())
        } else {
            self.frequency_count
        }
    }

    /// Why a data line with `pairs` value pairs cannot be used, if it can't
    ///
    /// Lines must match a declared count, and every column needs a carrier
    /// frequency to be read at.
    pub fn pair_mismatch(&self, pairs: usize) -> Option<String> {
        if let Some(expected) = self.expected_pairs() {
            if pairs != expected {
                return Some(format!("{pairs} value pair(s), header declares {expected}"));
            }
        }
        let available = self.resolved_frequencies(pairs).len();
        (pairs > available)
            .then(|| format!("{pairs} value pair(s), only {available} carrier frequencies"))
    }

    /// `(raw − offset) × gain` for column `index`
    pub fn correct(&self, index: usize, raw: f64) -> f64 {
        let offset = self.offsets.get(index).copied().unwrap_or(0.0);
        let gain = self.gains.get(index).copied().unwrap_or(1.0);
        (raw - offset) * gain
    }

    pub(crate) fn write_lines(&self, out: &mut String) {
        let mut put = |key: &str, value: &str| {
            out.push_str(key);
            out.push(';');
            out.push_str(value);
            out.push('\n');
        };
        let list = |values: &[f64]| {
            values
                .iter()
                .map(|v| text::format_decimal(*v))
                .collect::<Vec<_>>()
                .join(";")
        };

        if let Some(v) = &self.version {
            put("version", v);
        }
        if let Some(v) = &self.comment {
            put("comment", v);
        }
        if let Some(v) = &self.amp_mode {
            put("ampmode", v);
        }
        if let Some(v) = &self.orientation {
            put("orientation", v);
        }
        if let Some(d) = &self.date {
            put("date", &d.format("%d.%m.%Y").to_string());
        }
        if !self.offsets.is_empty() {
            put("offsets", &list(&self.offsets));
        }
        if !self.gains.is_empty() {
            put("gains", &list(&self.gains));
        }
        if let Some(n) = self.frequency_count {
            put("frequencycount", &n.to_string());
        }
        if !self.frequencies.is_empty() {
            put("frequencies", &list(&self.frequencies));
        }
        for (key, value) in &self.extra {
            put(key, value);
        }
    }
}

fn numbers(line_no: usize, values: &[&str]) -> Vec<f64> {
    values
        .iter()
        .filter_map(|v| {
            let parsed = text::parse_decimal(v);
            if parsed.is_none() {
                tracing::warn!(line = line_no, value = %v, "Ignoring non-numeric header value");
            }
            parsed
        })
        .collect()
}

pub(crate) fn parse_date(field: &str) -> Option<NaiveDate> {
    ["%d.%m.%Y", "%Y-%m-%d", "%d/%m/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(field.trim(), fmt).ok())
}

pub(crate) fn parse_time(field: &str) -> Option<NaiveTime> {
    let field = field.trim();
    NaiveTime::parse_from_str(field, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(field, "%H:%M"))
        .ok()
}

pub(crate) fn to_utc(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    NaiveDateTime::new(date, time).and_utc()
}

/// One data line of an EGD or ESD survey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyLine {
    /// 1-based line number in the source file
    pub line: usize,
    pub timestamp: DateTime<Utc>,
    /// Raw (A, B) pairs, one per frequency column
    pub values: Vec<(f64, f64)>,
    /// Trailing NMEA sentence as written (EGD)
    pub gps_sentence: Option<String>,
    pub gps: Option<GpsFix>,
    /// Profile number counted from 1 (ESD)
    pub profile: Option<u32>,
}

/// A parsed EGD or ESD file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    pub format: FileFormat,
    pub header: SurveyHeader,
    pub lines: Vec<SurveyLine>,
    /// Data lines dropped as malformed
    pub skipped_lines: usize,
}

impl Survey {
    /// Header-corrected samples, line by line and column by column
    pub fn samples(&self) -> Vec<RawSample> {
        let mut samples = Vec::new();
        for line in &self.lines {
            let frequencies = self.header.resolved_frequencies(line.values.len());
            let location = line.gps.filter(GpsFix::is_valid).map(|fix| fix.position());
            for (index, (&(a, b), &frequency_hz)) in
                line.values.iter().zip(frequencies.iter()).enumerate()
            {
                let real = self.header.correct(index, a);
                let imaginary = self.header.correct(index, b);
                samples.push(
                    RawSample::new(line.timestamp, frequency_hz, real, imaginary)
                        .with_survey_origin(location, line.profile),
                );
            }
        }
        samples
    }

    /// Number of profiles (ESD), 0 for EGD
    pub fn profile_count(&self) -> u32 {
        self.lines.iter().filter_map(|l| l.profile).max().unwrap_or(0)
    }
}

/// Any parsed legacy file
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFile {
    Survey(Survey),
    Fads(FadsSettings),
    Cal(CalFile),
}

impl ParsedFile {
    /// Samples for survey formats
    pub fn samples(&self) -> Result<Vec<RawSample>, CodecError> {
        match self {
            ParsedFile::Survey(survey) => Ok(survey.samples()),
            ParsedFile::Fads(_) => Err(CodecError::NotAReadingStream(FileFormat::Fads)),
            ParsedFile::Cal(_) => Err(CodecError::NotAReadingStream(FileFormat::Cal)),
        }
    }
}

/// Parse text in the given format
pub fn parse_str(text: &str, format: FileFormat) -> Result<ParsedFile, CodecError> {
    Ok(match format {
        FileFormat::Egd => ParsedFile::Survey(parse_egd(text)?),
        FileFormat::Esd => ParsedFile::Survey(parse_esd(text)?),
        FileFormat::Fads => ParsedFile::Fads(parse_fads(text)?),
        FileFormat::Cal => ParsedFile::Cal(parse_cal(text)?),
    })
}

/// Read and parse a file; `None` infers the format from the extension
pub fn parse_file(path: &Path, format: Option<FileFormat>) -> Result<ParsedFile, CodecError> {
    let format = format
        .or_else(|| FileFormat::from_path(path))
        .ok_or_else(|| CodecError::UnknownFormat(path.display().to_string()))?;
    let bytes = std::fs::read(path)?;
    // Legacy files may be Latin-1; invalid UTF-8 only affects free-text fields
    let text = String::from_utf8_lossy(&bytes);
    let parsed = parse_str(&text, format)?;
    tracing::info!(path = %path.display(), %format, "Parsed survey file");
    Ok(parsed)
}
