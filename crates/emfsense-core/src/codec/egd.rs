//! EGD grid survey files
//!
//! ```text
//! version;3.1
//! ampmode;1
//! offsets;0,5;0,0
//! frequencycount;1
//! datastart;
//! 14.06.2023;10:15:02;812,5;-240,25;$GPGGA,101502,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47
//! ```
//!
//! Data lines are `date;time;A1;B1;...;GPS`, one (A, B) pair per frequency
//! column. The trailing GGA sentence is optional.

use super::gps::parse_gpgga;
use super::{
    parse_date, parse_time, text, to_utc, CodecError, FileFormat, Survey, SurveyHeader, SurveyLine,
};

const DATA_START: &str = "datastart";

/// Parse EGD text
///
/// Malformed data lines are skipped and counted in
/// [`Survey::skipped_lines`]; a missing `datastart;` fails the file.
pub fn parse_egd(input: &str) -> Result<Survey, CodecError> {
    let lines = text::numbered_lines(input);
    let mut header = SurveyHeader::default();

    let data_start = lines
        .iter()
        .position(|(_, line)| text::is_marker(line, DATA_START))
        .ok_or_else(|| CodecError::HeaderMissing {
            format: FileFormat::Egd,
            detail: "no `datastart;` line".to_string(),
        })?;

    for (line_no, line) in &lines[..data_start] {
        if !line.trim().is_empty() {
            header.apply_line(*line_no, line);
        }
    }

    let mut survey = Survey {
        format: FileFormat::Egd,
        header,
        lines: Vec::new(),
        skipped_lines: 0,
    };

    for (line_no, line) in &lines[data_start + 1..] {
        if line.trim().is_empty() {
            continue;
        }
        match parse_data_line(*line_no, line, &survey.header) {
            Ok(parsed) => survey.lines.push(parsed),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping EGD data line");
                survey.skipped_lines += 1;
            }
        }
    }

    Ok(survey)
}

fn parse_data_line(
    line_no: usize,
    line: &str,
    header: &SurveyHeader,
) -> Result<SurveyLine, CodecError> {
    let malformed = |reason: &str| CodecError::DataLineMalformed {
        line: line_no,
        reason: reason.to_string(),
    };

    let mut fields = text::fields(line);
    if fields.len() < 4 {
        return Err(malformed("needs date, time and at least one value pair"));
    }

    let gps_sentence = match fields.last() {
        Some(last) if last.starts_with('$') => fields.pop().map(str::to_string),
        _ => None,
    };

    let date = parse_date(fields[0]).ok_or_else(|| malformed("unparseable date"))?;
    let time = parse_time(fields[1]).ok_or_else(|| malformed("unparseable time"))?;
    let values = parse_pairs(&fields[2..]).ok_or_else(|| malformed("bad value columns"))?;

    if let Some(reason) = header.pair_mismatch(values.len()) {
        return Err(malformed(&reason));
    }

    let gps = gps_sentence.as_deref().map(parse_gpgga);

    Ok(SurveyLine {
        line: line_no,
        timestamp: to_utc(date, time),
        values,
        gps_sentence,
        gps,
        profile: None,
    })
}

/// Consecutive `A;B` fields into pairs; None on an odd count or bad number
pub(crate) fn parse_pairs(fields: &[&str]) -> Option<Vec<(f64, f64)>> {
    if fields.is_empty() || fields.len() % 2 != 0 {
        return None;
    }
    fields
        .chunks_exact(2)
        .map(|pair| Some((text::parse_decimal(pair[0])?, text::parse_decimal(pair[1])?)))
        .collect()
}

pub(crate) fn write_pairs(out: &mut String, values: &[(f64, f64)]) {
    for (a, b) in values {
        out.push(';');
        out.push_str(&text::format_decimal(*a));
        out.push(';');
        out.push_str(&text::format_decimal(*b));
    }
}

/// Serialize a survey as EGD
pub fn write_egd(survey: &Survey) -> String {
    let mut out = String::new();
    survey.header.write_lines(&mut out);
    out.push_str("datastart;\n");
    for line in &survey.lines {
        out.push_str(&line.timestamp.format("%d.%m.%Y;%H:%M:%S%.3f").to_string());
        write_pairs(&mut out, &line.values);
        if let Some(gps) = &line.gps_sentence {
            out.push(';');
            out.push_str(gps);
        }
        out.push('\n');
    }
    out
}
