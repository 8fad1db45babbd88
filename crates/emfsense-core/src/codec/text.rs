//! Line and field helpers shared by the text formats

/// Field separator in every legacy format
pub const FIELD_SEPARATOR: char = ';';

/// Split text into numbered lines (1-based), accepting `\n`, `\r\n` or `\r`
pub fn numbered_lines(text: &str) -> Vec<(usize, &str)> {
    let lines: Vec<&str> = if text.contains('\n') {
        text.lines().collect()
    } else {
        text.split('\r').collect()
    };
    lines
        .into_iter()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim_end_matches('\r')))
        .collect()
}

/// Split a line on `;`, trimming fields and dropping a trailing empty field
pub fn fields(line: &str) -> Vec<&str> {
    let mut out: Vec<&str> = line.split(FIELD_SEPARATOR).map(str::trim).collect();
    while out.last().is_some_and(|f| f.is_empty()) {
        out.pop();
    }
    out
}

/// Parse a decimal number written with either `,` or `.`
pub fn parse_decimal(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() {
        return None;
    }
    let value: f64 = if field.contains(',') {
        field.replacen(',', ".", 1).parse().ok()?
    } else {
        field.parse().ok()?
    };
    value.is_finite().then_some(value)
}

/// Format a number with a `,` decimal separator
pub fn format_decimal(value: f64) -> String {
    value.to_string().replacen('.', ",", 1)
}

/// True for a line that only closes a section, e.g. `datastart;`
pub fn is_marker(line: &str, marker: &str) -> bool {
    let fields = fields(line);
    fields.len() == 1 && fields[0].eq_ignore_ascii_case(marker)
}
