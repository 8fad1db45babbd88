//! ESD profile survey files
//!
//! Same header as EGD, closed by `start of field;`. The data section is a
//! sequence of profiles, each closed by `end of profile;`. Data lines carry
//! only a time of day (`time;A1;B1;...`); the date comes from the header
//! `date` key, or the Unix epoch when absent.

use super::egd::{parse_pairs, write_pairs};
use super::{parse_time, text, to_utc, CodecError, FileFormat, Survey, SurveyHeader, SurveyLine};

const FIELD_START: &str = "start of field";
const PROFILE_END: &str = "end of profile";

/// Parse ESD text
pub fn parse_esd(input: &str) -> Result<Survey, CodecError> {
    let lines = text::numbered_lines(input);
    let mut header = SurveyHeader::default();

    let field_start = lines
        .iter()
        .position(|(_, line)| text::is_marker(line, FIELD_START))
        .ok_or_else(|| CodecError::HeaderMissing {
            format: FileFormat::Esd,
            detail: "no `start of field;` line".to_string(),
        })?;

    for (line_no, line) in &lines[..field_start] {
        if !line.trim().is_empty() {
            header.apply_line(*line_no, line);
        }
    }

    let date = header.date.unwrap_or_default();
    let mut survey = Survey {
        format: FileFormat::Esd,
        header,
        lines: Vec::new(),
        skipped_lines: 0,
    };

    let mut profile = 1u32;
    for (line_no, line) in &lines[field_start + 1..] {
        if line.trim().is_empty() {
            continue;
        }
        if text::is_marker(line, PROFILE_END) {
            profile += 1;
            continue;
        }

        let fields = text::fields(line);
        let parsed = fields
            .split_first()
            .and_then(|(time, rest)| Some((parse_time(time)?, parse_pairs(rest)?)));

        match parsed {
            Some((time, values)) => match survey.header.pair_mismatch(values.len()) {
                Some(reason) => {
                    tracing::warn!(
                        line = line_no,
                        %reason,
                        "Skipping ESD line with wrong column count"
                    );
                    survey.skipped_lines += 1;
                }
                None => survey.lines.push(SurveyLine {
                    line: *line_no,
                    timestamp: to_utc(date, time),
                    values,
                    gps_sentence: None,
                    gps: None,
                    profile: Some(profile),
                }),
            },
            None => {
                tracing::warn!(line = line_no, "Skipping malformed ESD data line");
                survey.skipped_lines += 1;
            }
        }
    }

    Ok(survey)
}

/// Serialize a survey as ESD
pub fn write_esd(survey: &Survey) -> String {
    let mut out = String::new();
    survey.header.write_lines(&mut out);
    out.push_str("start of field;\n");

    let mut current: Option<u32> = None;
    for line in &survey.lines {
        let profile = line.profile.unwrap_or(1);
        if let Some(previous) = current {
            for _ in previous..profile {
                out.push_str("end of profile;\n");
            }
        }
        current = Some(profile);

        out.push_str(&line.timestamp.format("%H:%M:%S%.3f").to_string());
        write_pairs(&mut out, &line.values);
        out.push('\n');
    }
    if current.is_some() {
        out.push_str("end of profile;\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "version;2.0\n\
                        date;03.09.2022\n\
                        frequencycount;2\n\
                        start of field;\n\
                        09:00:00;10;20;30;40\n\
                        09:00:01;11;21;31;41\n\
                        end of profile;\n\
                        09:01:00;12;22;32;42\n\
                        end of profile;\n";

    #[test]
    fn test_profiles_numbered_from_one() {
        let survey = parse_esd(FILE).unwrap();
        let profiles: Vec<_> = survey.lines.iter().map(|l| l.profile).collect();
        assert_eq!(profiles, vec![Some(1), Some(1), Some(2)]);
        assert_eq!(survey.profile_count(), 2);

        let samples = survey.samples();
        assert_eq!(samples.len(), 6);
        assert_eq!(samples[4].profile, Some(2));
        assert_eq!(samples[0].timestamp.format("%Y-%m-%d").to_string(), "2022-09-03");
    }

    #[test]
    fn test_missing_field_marker() {
        let err = parse_esd("version;2.0\n09:00:00;1;2\n").unwrap_err();
        assert!(matches!(err, CodecError::HeaderMissing { .. }));
    }

    #[test]
    fn test_bad_lines_counted() {
        let input = "frequencycount;1\nstart of field;\nxx;1;2\n\
                     09:00:00;1\n09:00:01;1;2;3;4\n09:00:02;5;6\n";
        let survey = parse_esd(input).unwrap();
        assert_eq!(survey.lines.len(), 1);
        assert_eq!(survey.skipped_lines, 3);
    }

    #[test]
    fn test_date_defaults_to_epoch() {
        let survey = parse_esd("start of field;\n12:30:00;1;1\n").unwrap();
        assert_eq!(survey.lines[0].timestamp.timestamp(), 12 * 3600 + 30 * 60);
    }

    #[test]
    fn test_writer_output_parses_back() {
        let survey = parse_esd(FILE).unwrap();
        let reparsed = parse_esd(&write_esd(&survey)).unwrap();
        let profiles: Vec<_> = reparsed.lines.iter().map(|l| l.profile).collect();
        assert_eq!(profiles, vec![Some(1), Some(1), Some(2)]);
        let values: Vec<_> = reparsed.lines.iter().map(|l| l.values.clone()).collect();
        let original: Vec<_> = survey.lines.iter().map(|l| l.values.clone()).collect();
        assert_eq!(values, original);
        assert_eq!(reparsed.header, survey.header);
    }
}
