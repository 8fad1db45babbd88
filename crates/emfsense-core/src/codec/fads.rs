//! FADS threshold settings
//!
//! A fixed four-line record:
//!
//! ```text
//! 12,5;1      threshold 1 ; enabled flag
//! 40;0        threshold 2 ; enabled flag
//! 3           parameter 1
//! 250         parameter 2
//! ```
//!
//! Unlike the survey formats there is nothing to skip: any bad or missing
//! line fails the whole file.

use super::{text, CodecError, FileFormat};
use serde::{Deserialize, Serialize};

const RECORD_LINES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSetting {
    pub threshold: f64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FadsSettings {
    pub thresholds: [ThresholdSetting; 2],
    pub parameters: [i64; 2],
}

pub fn parse_fads(input: &str) -> Result<FadsSettings, CodecError> {
    let lines: Vec<(usize, &str)> = text::numbered_lines(input)
        .into_iter()
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();

    if lines.len() < RECORD_LINES {
        return Err(CodecError::Truncated {
            format: FileFormat::Fads,
            expected: RECORD_LINES,
            found: lines.len(),
        });
    }

    Ok(FadsSettings {
        thresholds: [threshold(lines[0])?, threshold(lines[1])?],
        parameters: [parameter(lines[2])?, parameter(lines[3])?],
    })
}

fn threshold((line_no, line): (usize, &str)) -> Result<ThresholdSetting, CodecError> {
    let malformed = |reason: &str| CodecError::DataLineMalformed {
        line: line_no,
        reason: reason.to_string(),
    };
    let fields = text::fields(line);
    let [value, flag] = fields.as_slice() else {
        return Err(malformed("expected `threshold;flag`"));
    };
    let threshold = text::parse_decimal(value).ok_or_else(|| malformed("bad threshold"))?;
    let enabled = parse_flag(flag).ok_or_else(|| malformed("bad flag"))?;
    Ok(ThresholdSetting { threshold, enabled })
}

fn parameter((line_no, line): (usize, &str)) -> Result<i64, CodecError> {
    let fields = text::fields(line);
    match fields.as_slice() {
        [value] => value.parse().map_err(|_| CodecError::DataLineMalformed {
            line: line_no,
            reason: format!("`{value}` is not an integer"),
        }),
        _ => Err(CodecError::DataLineMalformed {
            line: line_no,
            reason: "expected a single integer".to_string(),
        }),
    }
}

fn parse_flag(field: &str) -> Option<bool> {
    match field.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

pub fn write_fads(settings: &FadsSettings) -> String {
    let mut out = String::new();
    for t in &settings.thresholds {
        out.push_str(&format!(
            "{};{}\n",
            text::format_decimal(t.threshold),
            u8::from(t.enabled)
        ));
    }
    for p in &settings.parameters {
        out.push_str(&format!("{p}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record() {
        let settings = parse_fads("12,5;1\r\n40;0\r\n3\r\n250\r\n").unwrap();
        assert_eq!(settings.thresholds[0].threshold, 12.5);
        assert!(settings.thresholds[0].enabled);
        assert!(!settings.thresholds[1].enabled);
        assert_eq!(settings.parameters, [3, 250]);
    }

    #[test]
    fn test_three_lines_truncated() {
        let err = parse_fads("12,5;1\n40;0\n3\n").unwrap_err();
        assert!(matches!(
            err,
            CodecError::Truncated {
                expected: 4,
                found: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_bad_line_fails_file() {
        let err = parse_fads("12,5;1\n40\n3\n250\n").unwrap_err();
        assert!(matches!(err, CodecError::DataLineMalformed { line: 2, .. }));
        assert!(parse_fads("12,5;1\n40;0\n3.5\n250\n").is_err());
    }

    #[test]
    fn test_writer_output_parses_back() {
        let settings = FadsSettings {
            thresholds: [
                ThresholdSetting {
                    threshold: 0.75,
                    enabled: false,
                },
                ThresholdSetting {
                    threshold: 18.0,
                    enabled: true,
                },
            ],
            parameters: [-2, 9000],
        };
        assert_eq!(parse_fads(&write_fads(&settings)).unwrap(), settings);
    }
}
