//! Ingestor: decodes an uploaded buffer into a [`RawTable`].
//!
//! Delimited text goes through encoding detection, delimiter sniffing and
//! header detection. Spreadsheet workbooks are read with `calamine`, one
//! table per non-empty sheet. Nothing here touches the filesystem.

use std::{collections::HashSet, io::Cursor};

use anyhow::Result;
use calamine::{Data, Reader, open_workbook_auto_from_rs};
use chrono::{NaiveDate, TimeDelta};
use heck::ToSnakeCase;
use itertools::Itertools;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    config::{AnalysisConfig, HeaderMode, InferenceConfig},
    data::{parse_date_with, parse_datetime_with, parse_decimal_lenient, parse_integer},
    error::{AnalysisError, AnalysisResult},
    io_utils::{self, CANDIDATE_DELIMITERS, DEFAULT_DELIMITER, TextEncoding},
};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];

const COMMON_HEADER_TOKENS: &[&str] = &[
    "address",
    "amount",
    "category",
    "city",
    "code",
    "country",
    "created",
    "currency",
    "date",
    "description",
    "email",
    "first_name",
    "id",
    "item",
    "last_name",
    "name",
    "phone",
    "price",
    "quantity",
    "region",
    "state",
    "status",
    "title",
    "total",
    "type",
    "updated",
    "zip",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Delimited,
    Workbook,
}

impl SourceFormat {
    /// Magic bytes decide; the declared MIME type never overrides them.
    pub fn detect(bytes: &[u8], declared_mime: &str) -> Self {
        if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
            return SourceFormat::Workbook;
        }
        let mime = declared_mime.to_ascii_lowercase();
        if mime.contains("spreadsheet") || mime.contains("excel") {
            debug!("Declared type '{declared_mime}' has no workbook signature; reading as text");
        }
        SourceFormat::Delimited
    }
}

/// Metadata describing where a table came from, carried by every derived artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceInfo {
    pub name: String,
    pub format: SourceFormat,
    pub encoding: Option<TextEncoding>,
    pub delimiter: Option<char>,
    pub has_header: bool,
    pub row_count: usize,
    pub column_count: usize,
}

/// Untyped rows exactly as decoded. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawTable {
    name: String,
    column_names: Vec<String>,
    rows: Vec<Vec<String>>,
    format: SourceFormat,
    encoding: Option<TextEncoding>,
    delimiter: Option<u8>,
    has_header: bool,
}

impl RawTable {
    /// Builds a table from already-split rows; rows are padded or truncated to the header width.
    pub fn from_rows(name: &str, column_names: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = column_names.len();
        let rows = rows
            .into_iter()
            .map(|row| fit_width(row, width))
            .collect();
        Self {
            name: name.to_string(),
            column_names,
            rows,
            format: SourceFormat::Delimited,
            encoding: Some(TextEncoding::Utf8),
            delimiter: Some(DEFAULT_DELIMITER),
            has_header: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.column_names.len()
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    pub fn encoding(&self) -> Option<TextEncoding> {
        self.encoding
    }

    pub fn delimiter(&self) -> Option<u8> {
        self.delimiter
    }

    pub fn has_header(&self) -> bool {
        self.has_header
    }

    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .map(move |row| row.get(index).map(String::as_str).unwrap_or(""))
    }

    pub fn source_info(&self) -> SourceInfo {
        SourceInfo {
            name: self.name.clone(),
            format: self.format,
            encoding: self.encoding,
            delimiter: self.delimiter.map(char::from),
            has_header: self.has_header,
            row_count: self.rows.len(),
            column_count: self.column_names.len(),
        }
    }

    /// Re-serializes the table; the header row is written only if one was detected.
    pub fn to_delimited(&self, delimiter: u8) -> Result<String> {
        let headers = self.has_header.then_some(self.column_names.as_slice());
        io_utils::write_delimited(headers, self.rows.iter(), delimiter)
    }
}

/// Decodes `bytes` into a single table (the first non-empty sheet for workbooks).
pub fn ingest(bytes: &[u8], declared_mime: &str, config: &AnalysisConfig) -> AnalysisResult<RawTable> {
    ingest_all("upload", bytes, declared_mime, config)?
        .into_iter()
        .next()
        .ok_or_else(|| AnalysisError::empty("upload"))
}

/// Decodes `bytes` into one table per sheet (exactly one for delimited text).
///
/// `declared_mime` is advisory: a tab-separated type makes tab win delimiter
/// ties. Header detection reads dates with the run's configured formats.
pub fn ingest_all(
    name: &str,
    bytes: &[u8],
    declared_mime: &str,
    config: &AnalysisConfig,
) -> AnalysisResult<Vec<RawTable>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(AnalysisError::empty(name));
    }
    let table_name = table_name_from_source(name);
    match SourceFormat::detect(bytes, declared_mime) {
        SourceFormat::Delimited => {
            ingest_delimited(name, &table_name, bytes, declared_mime, config).map(|t| vec![t])
        }
        SourceFormat::Workbook => ingest_workbook(name, &table_name, bytes, config),
    }
}

/// `Customer Orders.csv` becomes `customer_orders`.
pub fn table_name_from_source(name: &str) -> String {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    let snake = stem.to_snake_case();
    if snake.is_empty() {
        "table".to_string()
    } else {
        snake
    }
}

/// Delimiter implied by a declared MIME type, if any.
fn delimiter_hint(declared_mime: &str) -> Option<u8> {
    let mime = declared_mime.to_ascii_lowercase();
    if mime.starts_with("text/tab-separated-values") {
        Some(b'\t')
    } else if mime.starts_with("text/csv") {
        Some(b',')
    } else {
        None
    }
}

fn ingest_delimited(
    source: &str,
    table_name: &str,
    bytes: &[u8],
    declared_mime: &str,
    config: &AnalysisConfig,
) -> AnalysisResult<RawTable> {
    let (encoding, text) = io_utils::detect_and_decode(bytes)
        .ok_or_else(|| AnalysisError::format(source, "no candidate text encoding matched"))?;
    if text.contains('\0') {
        return Err(AnalysisError::format(
            source,
            "buffer contains binary data and no workbook signature",
        ));
    }
    if text.trim().is_empty() {
        return Err(AnalysisError::empty(source));
    }

    let preferred = delimiter_hint(declared_mime);
    let sniffed = sniff_delimiter(&text, config.ingest.delimiter_sample_rows, preferred)
        .ok_or_else(|| {
            AnalysisError::format(
                source,
                "no candidate delimiter produced a consistent column count",
            )
        })?;
    info!(
        "'{source}': {} encoding, delimiter '{}', {} column(s)",
        encoding.label(),
        io_utils::printable_delimiter(sniffed.delimiter),
        sniffed.width
    );

    let records = read_records(&text, sniffed.delimiter)
        .map_err(|err| AnalysisError::format(source, format!("malformed delimited text: {err}")))?;

    let mut table = build_table(source, table_name, records, sniffed.width, config)?;
    table.encoding = Some(encoding);
    table.delimiter = Some(sniffed.delimiter);
    Ok(table)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DelimiterScore {
    delimiter: u8,
    width: usize,
    agreeing: usize,
    preferred: bool,
    priority: usize,
}

impl DelimiterScore {
    fn rank(&self) -> (bool, usize, bool, std::cmp::Reverse<usize>) {
        (
            self.width >= 2,
            self.agreeing,
            self.preferred,
            std::cmp::Reverse(self.priority),
        )
    }
}

/// Picks the candidate whose modal column count is shared by the most sampled rows.
///
/// Multi-column readings outrank single-column ones; ties go to the
/// `preferred` delimiter, then to the candidate priority order. A candidate whose modal count does not cover a
/// strict majority of the sample is unusable. A single-column reading is only
/// accepted when no candidate split any sampled row into several fields.
fn sniff_delimiter(text: &str, sample_rows: usize, preferred: Option<u8>) -> Option<DelimiterScore> {
    let readings: Vec<(DelimiterScore, bool, usize)> = CANDIDATE_DELIMITERS
        .iter()
        .enumerate()
        .filter_map(|(priority, &delimiter)| {
            let mut reader = io_utils::open_csv_reader(text, delimiter);
            let widths = reader
                .records()
                .take(sample_rows.max(1))
                .map(|record| record.map(|r| r.len()))
                .collect::<Result<Vec<_>, _>>()
                .ok()?;
            let widest = widths.iter().copied().max()?;
            let (width, agreeing) = widths
                .iter()
                .counts()
                .into_iter()
                .max_by_key(|(width, count)| (*count, **width))?;
            let score = DelimiterScore {
                delimiter,
                width: *width,
                agreeing,
                preferred: preferred == Some(delimiter),
                priority,
            };
            debug!(
                "Delimiter '{}': modal width {} shared by {}/{} row(s)",
                io_utils::printable_delimiter(delimiter),
                score.width,
                score.agreeing,
                widths.len()
            );
            Some((score, agreeing * 2 > widths.len(), widest))
        })
        .collect();

    let split_somewhere = readings.iter().any(|(_, _, widest)| *widest >= 2);
    readings
        .into_iter()
        .filter(|(score, usable, _)| *usable && (score.width >= 2 || !split_somewhere))
        .map(|(score, _, _)| score)
        .max_by_key(DelimiterScore::rank)
}

fn read_records(text: &str, delimiter: u8) -> Result<Vec<Vec<String>>, csv::Error> {
    let mut reader = io_utils::open_csv_reader(text, delimiter);
    reader
        .records()
        .map(|record| record.map(|r| r.iter().map(str::to_string).collect()))
        .collect()
}

fn ingest_workbook(
    source: &str,
    table_name: &str,
    bytes: &[u8],
    config: &AnalysisConfig,
) -> AnalysisResult<Vec<RawTable>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|err| AnalysisError::format(source, format!("unreadable workbook: {err}")))?;
    let sheets = workbook.sheet_names().to_vec();
    if sheets.is_empty() {
        return Err(AnalysisError::format(source, "workbook has no sheets"));
    }
    let multi_sheet = sheets.len() > 1;

    let mut tables = Vec::new();
    for sheet in &sheets {
        let range = workbook.worksheet_range(sheet).map_err(|err| {
            AnalysisError::format(source, format!("unreadable sheet '{sheet}': {err}"))
        })?;
        let records: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(cell_to_text).collect())
            .skip_while(|row: &Vec<String>| row.iter().all(|cell| cell.trim().is_empty()))
            .collect();
        if records.is_empty() {
            debug!("'{source}': sheet '{sheet}' is empty; skipping");
            continue;
        }
        let width = records.iter().map(Vec::len).max().unwrap_or(0);
        let name = if multi_sheet {
            table_name_from_source(sheet)
        } else {
            table_name.to_string()
        };
        let label = format!("{source}:{sheet}");
        match build_table(&label, &name, records, width, config) {
            Ok(mut table) => {
                table.format = SourceFormat::Workbook;
                table.encoding = None;
                table.delimiter = None;
                tables.push(table);
            }
            Err(AnalysisError::EmptyInput { .. }) if multi_sheet => {
                warn!("'{label}' has a header but no data rows; skipping sheet");
            }
            Err(err) => return Err(err),
        }
    }

    if tables.is_empty() {
        return Err(AnalysisError::empty(source));
    }
    Ok(tables)
}

fn cell_to_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                (*f as i64).to_string()
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_text(dt.as_f64()).unwrap_or_else(|| dt.to_string()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        #[allow(unreachable_patterns)]
        other => other.to_string(),
    }
}

/// Excel serial day numbers count from 1899-12-30.
fn excel_serial_to_text(serial: f64) -> Option<String> {
    if !serial.is_finite() {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = TimeDelta::try_days(serial.trunc() as i64)?;
    let seconds = (serial.fract() * 86_400.0).round() as i64;
    let timestamp = epoch
        .checked_add_signed(days)?
        .checked_add_signed(TimeDelta::try_seconds(seconds)?)?;
    if seconds == 0 {
        Some(timestamp.format("%Y-%m-%d").to_string())
    } else {
        Some(timestamp.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}

fn build_table(
    source: &str,
    table_name: &str,
    records: Vec<Vec<String>>,
    width: usize,
    config: &AnalysisConfig,
) -> AnalysisResult<RawTable> {
    let ragged = records.iter().filter(|row| row.len() != width).count();
    if ragged > 0 {
        debug!("'{source}': {ragged} row(s) padded or truncated to {width} column(s)");
    }
    let mut rows: Vec<Vec<String>> = records
        .into_iter()
        .map(|row| fit_width(row, width))
        .collect();
    if rows.is_empty() {
        return Err(AnalysisError::empty(source));
    }

    let has_header = match config.ingest.header {
        HeaderMode::Present => true,
        HeaderMode::Absent => false,
        HeaderMode::Auto => infer_has_header(
            &rows[0],
            rows.get(1).map(Vec::as_slice),
            &config.inference,
        ),
    };
    debug!("'{source}': header row {}", if has_header { "detected" } else { "absent" });

    let column_names = if has_header {
        let header = rows.remove(0);
        resolve_column_names(&header)
    } else {
        generate_column_names(width)
    };
    if rows.is_empty() {
        return Err(AnalysisError::empty(source));
    }

    Ok(RawTable {
        name: table_name.to_string(),
        column_names,
        rows,
        format: SourceFormat::Delimited,
        encoding: None,
        delimiter: None,
        has_header,
    })
}

fn fit_width(mut row: Vec<String>, width: usize) -> Vec<String> {
    row.resize(width, String::new());
    row
}

fn generate_column_names(count: usize) -> Vec<String> {
    (0..count).map(|idx| format!("col_{idx}")).collect()
}

/// Blank header cells become `col_N`; repeated names get numeric suffixes.
fn resolve_column_names(header: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    header
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            let trimmed = cell.trim();
            let base = if trimmed.is_empty() {
                format!("col_{idx}")
            } else {
                trimmed.to_string()
            };
            let mut candidate = base.clone();
            let mut suffix = 2;
            while !seen.insert(candidate.to_ascii_lowercase()) {
                candidate = format!("{base}_{suffix}");
                suffix += 1;
            }
            candidate
        })
        .collect()
}

fn value_is_data_like(value: &str, formats: &InferenceConfig) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return false;
    }
    parse_integer(trimmed).is_some()
        || parse_decimal_lenient(trimmed).is_some()
        || parse_date_with(trimmed, &formats.date_formats).is_some()
        || parse_datetime_with(trimmed, &formats.datetime_formats).is_some()
}

fn token_is_common_header(value: &str) -> bool {
    let normalized = value
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|ch| match ch {
            ' ' | '-' | '/' => '_',
            other => other,
        })
        .collect::<String>();
    !normalized.is_empty()
        && (COMMON_HEADER_TOKENS.contains(&normalized.as_str()) || normalized.ends_with("_id"))
}

/// The first row is a header when none of its cells is numeric or a date while
/// the second row has at least one such cell. A first row of plain words that
/// match at least two common header tokens also counts as a header.
fn infer_has_header(first: &[String], second: Option<&[String]>, formats: &InferenceConfig) -> bool {
    if first.iter().any(|cell| value_is_data_like(cell, formats)) {
        return false;
    }
    if second.is_some_and(|row| row.iter().any(|cell| value_is_data_like(cell, formats))) {
        return true;
    }
    first
        .iter()
        .filter(|cell| token_is_common_header(cell))
        .count()
        >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    }

    #[test]
    fn sniff_prefers_multi_column_reading() {
        let text = "a;b;c\n1;2;3\n4;5;6\n";
        let score = sniff_delimiter(text, 10, None).unwrap();
        assert_eq!(score.delimiter, b';');
        assert_eq!(score.width, 3);
    }

    #[test]
    fn sniff_breaks_ties_by_priority() {
        let text = "a,b|c\n1,2|3\n";
        let score = sniff_delimiter(text, 10, None).unwrap();
        assert_eq!(score.delimiter, b',');
    }

    #[test]
    fn sniff_rejects_inconsistent_text() {
        let text = "a,b\n1,2,3,4\nx\n";
        assert!(sniff_delimiter(text, 10, None).is_none());
    }

    #[test]
    fn sniff_accepts_single_column_when_nothing_splits() {
        let score = sniff_delimiter("note\nhello world\n\"a, b\"\n", 10, None).unwrap();
        assert_eq!(score.delimiter, b',');
        assert_eq!(score.width, 1);
    }

    #[test]
    fn declared_tab_separated_type_wins_ties() {
        let text = "a,b\tc\n1,2\t3\n";
        assert_eq!(sniff_delimiter(text, 10, None).unwrap().delimiter, b',');
        let hinted = sniff_delimiter(text, 10, delimiter_hint("text/tab-separated-values")).unwrap();
        assert_eq!(hinted.delimiter, b'\t');
        assert_eq!(delimiter_hint("application/octet-stream"), None);
    }

    #[test]
    fn header_detection_uses_configured_date_formats() {
        let table = rows(&[&["when", "what"], &["2021|03|04", "launch"]]);
        assert!(!infer_has_header(&table[0], Some(&table[1]), &InferenceConfig::default()));

        let formats = InferenceConfig {
            date_formats: vec!["%Y|%m|%d".to_string()],
            ..InferenceConfig::default()
        };
        assert!(infer_has_header(&table[0], Some(&table[1]), &formats));
    }

    #[test]
    fn header_requires_data_in_second_row() {
        let formats = InferenceConfig::default();
        let header = rows(&[&["id", "name"], &["1", "Alice"]]);
        assert!(infer_has_header(&header[0], Some(&header[1]), &formats));

        let numeric_first = rows(&[&["1", "Alice"], &["2", "Bob"]]);
        assert!(!infer_has_header(&numeric_first[0], Some(&numeric_first[1]), &formats));
    }

    #[test]
    fn header_dictionary_fallback_for_text_only_tables() {
        let formats = InferenceConfig::default();
        let table = rows(&[&["name", "city"], &["Alice", "Paris"]]);
        assert!(infer_has_header(&table[0], Some(&table[1]), &formats));

        let plain = rows(&[&["apple", "pear"], &["plum", "fig"]]);
        assert!(!infer_has_header(&plain[0], Some(&plain[1]), &formats));
    }

    #[test]
    fn resolve_column_names_fills_blanks_and_dedupes() {
        let header = vec!["id".to_string(), "".to_string(), "ID".to_string()];
        assert_eq!(resolve_column_names(&header), vec!["id", "col_1", "ID_2"]);
    }

    #[test]
    fn table_name_from_source_snake_cases_stem() {
        assert_eq!(table_name_from_source("uploads/Customer Orders.csv"), "customer_orders");
        assert_eq!(table_name_from_source("Sheet1"), "sheet1");
        assert_eq!(table_name_from_source(".csv"), "csv");
    }

    #[test]
    fn excel_serial_dates_render_as_iso() {
        assert_eq!(excel_serial_to_text(44201.0).as_deref(), Some("2021-01-05"));
        assert_eq!(
            excel_serial_to_text(44201.5).as_deref(),
            Some("2021-01-05 12:00:00")
        );
    }
}
