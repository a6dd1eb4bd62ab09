use std::path::Path;
use std::sync::OnceLock;

use encoding_rs::{UTF_16BE, UTF_16LE, UTF_8};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::plan::{PlanCode, PlanRow, MAX_ROW_CFU};
use crate::tracker::Exam;

pub const EXPECTED_HEADER: [&str; 3] = ["Codice", "Denominazione", "CFU"];

/// Bytes inspected when guessing a BOM-less encoding.
const ENCODING_SAMPLE_LEN: usize = 4000;
/// Share of NUL bytes at odd offsets above which BOM-less text is UTF-16LE.
const UTF16_ZERO_RATIO: f64 = 0.2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImportError {
    #[error("invalid file name '{0}': expected XX-YY.csv, e.g. 07-89.csv")]
    InvalidFileName(String),

    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("file is empty")]
    EmptyFile,

    #[error("invalid header: expected '{expected}', found '{found}'")]
    HeaderMismatch { expected: String, found: String },

    #[error("no valid rows in file")]
    NoValidRows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    Utf8,
    Utf8Bom,
    Utf16Le,
    Utf16LeBom,
    Utf16BeBom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPlan {
    pub rows: Vec<PlanRow>,
    pub encoding: TextEncoding,
    pub delimiter: char,
    /// Data rows dropped during normalization.
    pub dropped: usize,
}

fn file_name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^[0-9]{2}-[0-9]{2}\.csv$").expect("plan file name pattern"))
}

/// Derives the plan code from the file name; the file content is never
/// trusted to supply it.
pub fn plan_code_from_file_name(path: &Path) -> Result<PlanCode, ImportError> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    if !file_name_pattern().is_match(name) {
        return Err(ImportError::InvalidFileName(name.to_string()));
    }
    PlanCode::parse(&name[..5]).map_err(|_| ImportError::InvalidFileName(name.to_string()))
}

pub fn detect_encoding(bytes: &[u8]) -> TextEncoding {
    if bytes.starts_with(&[0xFF, 0xFE]) {
        return TextEncoding::Utf16LeBom;
    }
    if bytes.starts_with(&[0xFE, 0xFF]) {
        return TextEncoding::Utf16BeBom;
    }
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return TextEncoding::Utf8Bom;
    }

    let sample = &bytes[..bytes.len().min(ENCODING_SAMPLE_LEN)];
    let odd_slots = sample.len() / 2;
    if odd_slots == 0 {
        return TextEncoding::Utf8;
    }
    let odd_zeros = sample.iter().skip(1).step_by(2).filter(|b| **b == 0).count();
    if odd_zeros as f64 / odd_slots as f64 > UTF16_ZERO_RATIO {
        TextEncoding::Utf16Le
    } else {
        TextEncoding::Utf8
    }
}

/// Decodes file bytes; malformed sequences become U+FFFD.
pub fn decode_text(bytes: &[u8]) -> (String, TextEncoding) {
    let encoding = detect_encoding(bytes);
    let (text, _) = match encoding {
        TextEncoding::Utf16LeBom => UTF_16LE.decode_without_bom_handling(&bytes[2..]),
        TextEncoding::Utf16BeBom => UTF_16BE.decode_without_bom_handling(&bytes[2..]),
        TextEncoding::Utf8Bom => UTF_8.decode_without_bom_handling(&bytes[3..]),
        TextEncoding::Utf16Le => UTF_16LE.decode_without_bom_handling(bytes),
        TextEncoding::Utf8 => UTF_8.decode_without_bom_handling(bytes),
    };
    (text.into_owned(), encoding)
}

/// `;` unless commas strictly outnumber semicolons.
pub fn sniff_delimiter(header_line: &str) -> char {
    let semicolons = header_line.matches(';').count();
    let commas = header_line.matches(',').count();
    if commas > semicolons {
        ','
    } else {
        ';'
    }
}

fn clean_field(raw: &str) -> String {
    let t = raw.trim();
    let unquoted = if t.len() >= 2 && t.starts_with('"') && t.ends_with('"') {
        &t[1..t.len() - 1]
    } else {
        t
    };
    unquoted.to_string()
}

/// Splits one record, padding to `width` fields.
pub fn split_record(line: &str, delimiter: char, width: usize) -> Vec<String> {
    let mut fields: Vec<String> = line.split(delimiter).map(clean_field).collect();
    while fields.len() < width {
        fields.push(String::new());
    }
    fields
}

fn normalize_header_cell(cell: &str) -> String {
    cell.chars()
        .filter(|c| !matches!(c, '\u{feff}' | '\u{fffe}' | '\0'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn is_blank_line(line: &str) -> bool {
    line.trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .is_empty()
}

/// CFU as written in spreadsheets: comma decimals allowed, floored, never
/// negative, 0 when unreadable.
pub fn parse_cfu(raw: &str) -> u32 {
    let normalized = raw.trim().replace(',', ".");
    match normalized.parse::<f64>() {
        Ok(v) if v.is_finite() => v.floor().clamp(0.0, f64::from(u32::MAX)) as u32,
        _ => 0,
    }
}

/// Parses a `Codice;Denominazione;CFU` file (UTF-8 or UTF-16, `;` or `,`).
/// Fields are split on the delimiter without quote-aware parsing; one pair
/// of enclosing quotes is stripped per field.
pub fn parse_plan_csv(bytes: &[u8]) -> Result<ParsedPlan, ImportError> {
    let (text, encoding) = decode_text(bytes);
    let mut lines = text.lines().filter(|l| !is_blank_line(l));

    let Some(header_line) = lines.next() else {
        return Err(ImportError::EmptyFile);
    };
    let delimiter = sniff_delimiter(header_line);
    let header: Vec<String> = split_record(header_line, delimiter, 0)
        .iter()
        .map(|c| normalize_header_cell(c))
        .collect();
    if header != EXPECTED_HEADER {
        let sep = delimiter.to_string();
        return Err(ImportError::HeaderMismatch {
            expected: EXPECTED_HEADER.join(sep.as_str()),
            found: header.join(sep.as_str()),
        });
    }

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for line in lines {
        let fields = split_record(line, delimiter, EXPECTED_HEADER.len());
        let codice = fields[0].trim();
        let denominazione = fields[1].trim();
        let cfu = parse_cfu(&fields[2]);
        if codice.is_empty() || denominazione.is_empty() || cfu == 0 {
            dropped += 1;
            continue;
        }
        rows.push(PlanRow {
            codice: codice.to_string(),
            denominazione: denominazione.to_string(),
            // same ceiling the plan store applies on publish
            cfu: cfu.min(MAX_ROW_CFU as u32),
        });
    }

    if rows.is_empty() {
        return Err(ImportError::NoValidRows);
    }
    debug!(
        rows = rows.len(),
        dropped,
        ?encoding,
        %delimiter,
        "parsed plan csv"
    );
    Ok(ParsedPlan {
        rows,
        encoding,
        delimiter,
        dropped,
    })
}

/// Reads and parses a plan file, checking the file name first.
pub fn read_plan_file(path: &Path) -> Result<(PlanCode, ParsedPlan), ImportError> {
    let code = plan_code_from_file_name(path)?;
    let bytes = std::fs::read(path).map_err(|e| ImportError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let parsed = parse_plan_csv(&bytes)?;
    Ok((code, parsed))
}

fn csv_quote(s: &str) -> String {
    if s.contains(';') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Exam list as a semicolon CSV with a UTF-8 BOM, for spreadsheet apps.
pub fn write_exams_csv(exams: &[Exam]) -> String {
    let mut csv = String::from("\u{feff}Denominazione;CFU;Voto\r\n");
    for exam in exams {
        csv.push_str(&format!(
            "{};{};{}\r\n",
            csv_quote(&exam.name),
            exam.cfu,
            csv_quote(&exam.grade)
        ));
    }
    csv
}

/// Field text that `split_record` reads back unchanged: no delimiter, no
/// line break, and an extra pair of quotes when the text is itself quoted.
fn plan_field(s: &str, delimiter: char) -> String {
    let replacement = if delimiter == ';' { ',' } else { ';' };
    let flat: String = s
        .chars()
        .map(|c| match c {
            '\r' | '\n' => ' ',
            c if c == delimiter => replacement,
            c => c,
        })
        .collect();
    if flat.len() >= 2 && flat.starts_with('"') && flat.ends_with('"') {
        format!("\"{flat}\"")
    } else {
        flat
    }
}

/// Plan rows in the import format, so a fetched plan can be re-imported.
/// Uses `,` when titles contain `;` but no `,`; otherwise `;`, with any
/// `;` in a field written as `,`.
pub fn write_plan_csv(rows: &[PlanRow]) -> String {
    let fields = || rows.iter().flat_map(|r| [&r.codice, &r.denominazione]);
    let delimiter = if fields().any(|f| f.contains(';')) && !fields().any(|f| f.contains(',')) {
        ','
    } else {
        ';'
    };
    let sep = delimiter.to_string();
    let mut csv = format!("{}\r\n", EXPECTED_HEADER.join(sep.as_str()));
    for row in rows {
        csv.push_str(&format!(
            "{}{delimiter}{}{delimiter}{}\r\n",
            plan_field(&row.codice, delimiter),
            plan_field(&row.denominazione, delimiter),
            row.cfu
        ));
    }
    csv
}
