//! Tabular reader
//!
//! Parses decoded text into a header and ordered [`RowView`]s. Every cell
//! stays raw text. Lines with the wrong field count are kept: short lines are
//! padded with absent values, surplus fields land in `_extra_N` columns.
//!
//! The first pass parses the whole text as CSV and fails on an unterminated
//! quote. The retry reads one physical line at a time and drops the lines it
//! cannot read.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::error::{IngestError, IngestResult};
use crate::format::DetectedFormat;
use crate::row::{Field, RowView};

const QUOTE: char = '"';

/// Parsed file contents
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<RowView>,
    /// Lines whose field count differs from the header
    pub malformed_lines: usize,
    /// Lines skipped by the lenient retry
    pub dropped_lines: usize,
}

impl Table {
    fn with_headers(headers: Vec<String>) -> Self {
        Self {
            headers,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a record, padding or spilling to match the header width
    fn push_record(&mut self, record: &csv::StringRecord, line: u64) {
        let width = self.headers.len();
        if record.len() != width {
            self.malformed_lines += 1;
            warn!(
                line,
                expected = width,
                found = record.len(),
                "Malformed line, field count differs from header"
            );
        }

        let cells = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, column)| (column.clone(), record.get(i).unwrap_or_default().to_string()))
            .chain(
                record
                    .iter()
                    .skip(width)
                    .enumerate()
                    .map(|(i, value)| (format!("_extra_{}", i + 1), value.to_string())),
            );

        let row = RowView::from_raw(self.rows.len(), cells);
        self.rows.push(row);
    }
}

/// Parse a detected file into header and rows
pub fn read_table(bytes: &[u8], format: &DetectedFormat) -> IngestResult<Table> {
    let text = format.decode(bytes)?;
    let text = text.trim_start_matches('\u{feff}');

    let table = match parse_strict(text, format.delimiter) {
        Ok(table) => table,
        Err(ParseError::Header(message)) => return Err(IngestError::HeaderValidation(message)),
        Err(e) => {
            warn!(error = %e, "CSV parse failed, retrying in lenient mode");
            let table = parse_lenient(text, format.delimiter)?;
            if table.rows.is_empty() && table.dropped_lines > 0 {
                return Err(IngestError::ParseCorruption(format!(
                    "all {} data lines are unreadable",
                    table.dropped_lines
                )));
            }
            table
        }
    };

    if table.rows.is_empty() && table.dropped_lines == 0 {
        return Err(IngestError::HeaderOnly);
    }

    debug!(
        rows = table.rows.len(),
        columns = table.headers.len(),
        malformed_lines = table.malformed_lines,
        dropped_lines = table.dropped_lines,
        "Read table"
    );

    Ok(table)
}

/// Whole-text parse; quoted fields may span lines
fn parse_strict(text: &str, delimiter: u8) -> Result<Table, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let header = reader.headers().map_err(ParseError::Csv)?.clone();
    let header_end = reader.position().byte() as usize;
    if has_open_quote(text.get(..header_end).unwrap_or_default()) {
        return Err(ParseError::UnterminatedQuote { line: 1 });
    }

    let mut table = Table::with_headers(validate_headers(header.iter())?);
    let mut record = csv::StringRecord::new();

    loop {
        let start = reader.position().clone();
        if !reader.read_record(&mut record).map_err(ParseError::Csv)? {
            break;
        }

        // An odd quote count means a quoted field ran to the end of input
        let end = reader.position().byte() as usize;
        let source = text.get(start.byte() as usize..end).unwrap_or_default();
        if has_open_quote(source) {
            return Err(ParseError::UnterminatedQuote { line: start.line() });
        }

        table.push_record(&record, start.line());
    }

    Ok(table)
}

/// Line-at-a-time parse that drops unreadable lines
fn parse_lenient(text: &str, delimiter: u8) -> Result<Table, ParseError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i as u64 + 1, line))
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((header_line, header)) = lines.next() else {
        return Ok(Table::default());
    };
    let header = read_line(header, delimiter).ok_or(ParseError::UnreadableHeader {
        line: header_line,
    })?;
    let mut table = Table::with_headers(validate_headers(header.iter())?);

    for (line, content) in lines {
        match read_line(content, delimiter) {
            Some(record) => table.push_record(&record, line),
            None => {
                warn!(line, "Dropping unreadable line");
                table.dropped_lines += 1;
            }
        }
    }

    Ok(table)
}

fn read_line(line: &str, delimiter: u8) -> Option<csv::StringRecord> {
    if has_open_quote(line) {
        return None;
    }

    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .has_headers(false)
        .from_reader(line.as_bytes())
        .records()
        .next()?
        .ok()
}

fn has_open_quote(source: &str) -> bool {
    source.matches(QUOTE).count() % 2 == 1
}

/// Trim names, name blank columns, reject duplicates and a missing email column
fn validate_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Result<Vec<String>, ParseError> {
    let mut seen = HashSet::new();
    let mut headers = Vec::new();

    for (i, name) in raw.enumerate() {
        let name = name.trim().trim_start_matches('\u{feff}').trim();
        let name = if name.is_empty() {
            format!("_column_{}", i + 1)
        } else {
            name.to_string()
        };

        if !seen.insert(name.to_lowercase()) {
            return Err(ParseError::Header(format!(
                "Duplicate column name: '{}'",
                name
            )));
        }
        headers.push(name);
    }

    if !headers
        .iter()
        .any(|name| Field::from_column(name) == Some(Field::Email))
    {
        return Err(ParseError::Header(format!(
            "Missing required column: email (found: {})",
            headers.join(", ")
        )));
    }

    Ok(headers)
}

#[derive(Debug, thiserror::Error)]
enum ParseError {
    #[error("{0}")]
    Csv(csv::Error),

    #[error("unterminated quoted field starting on line {line}")]
    UnterminatedQuote { line: u64 },

    #[error("header line {line} is unreadable")]
    UnreadableHeader { line: u64 },

    #[error("{0}")]
    Header(String),
}

impl From<ParseError> for IngestError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Header(message) => IngestError::HeaderValidation(message),
            other => IngestError::ParseCorruption(other.to_string()),
        }
    }
}
