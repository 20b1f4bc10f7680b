//! I/O utilities for decoding uploads and writing delimited text.
//!
//! - **Encoding**: candidate decoding (UTF-8, UTF-8 with BOM, Latin-1) via
//!   `encoding_rs`.
//! - **Reader/writer construction**: in-memory `csv` readers for sniffing and
//!   parsing, writers that render tables back to delimited text.
//! - **MIME hints**: extension to MIME mapping for callers that only have a
//!   file name.
//! - **Quoting**: output uses `QuoteStyle::Always` for round-trip safety.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DELIMITER: u8 = b',';
pub const CANDIDATE_DELIMITERS: &[u8] = &[b',', b';', b'\t', b'|'];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    Utf8,
    Utf8Bom,
    Latin1,
}

impl TextEncoding {
    pub const CANDIDATES: [TextEncoding; 3] =
        [TextEncoding::Utf8, TextEncoding::Utf8Bom, TextEncoding::Latin1];

    pub fn label(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Utf8Bom => "UTF-8 (BOM)",
            TextEncoding::Latin1 => "Latin-1",
        }
    }

    fn encoding(&self) -> &'static Encoding {
        match self {
            TextEncoding::Utf8 | TextEncoding::Utf8Bom => UTF_8,
            TextEncoding::Latin1 => WINDOWS_1252,
        }
    }

    /// Decodes `bytes` if they are valid for this candidate.
    pub fn try_decode(&self, bytes: &[u8]) -> Option<String> {
        let payload = match self {
            TextEncoding::Utf8 if bytes.starts_with(UTF8_BOM) => return None,
            TextEncoding::Utf8 | TextEncoding::Latin1 => bytes,
            TextEncoding::Utf8Bom => bytes.strip_prefix(UTF8_BOM)?,
        };
        decode_bytes(payload, self.encoding()).ok()
    }
}

/// Tries each candidate encoding in priority order.
pub fn detect_and_decode(bytes: &[u8]) -> Option<(TextEncoding, String)> {
    TextEncoding::CANDIDATES
        .iter()
        .find_map(|candidate| candidate.try_decode(bytes).map(|text| (*candidate, text)))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn open_csv_reader(text: &str, delimiter: u8) -> csv::Reader<&[u8]> {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(text.as_bytes())
}

pub fn open_csv_writer(delimiter: u8) -> csv::Writer<Vec<u8>> {
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .double_quote(true);
    builder.from_writer(Vec::new())
}

/// Renders a header (when present) and rows as delimited UTF-8 text.
pub fn write_delimited<I, R>(headers: Option<&[String]>, rows: I, delimiter: u8) -> Result<String>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let mut writer = open_csv_writer(delimiter);
    if let Some(headers) = headers {
        writer
            .write_record(headers.iter())
            .context("Writing header row")?;
    }
    for (idx, row) in rows.into_iter().enumerate() {
        writer
            .write_record(row)
            .with_context(|| format!("Writing row {}", idx + 1))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow!("Flushing delimited output: {}", err.error()))?;
    String::from_utf8(bytes).context("Delimited output is not valid UTF-8")
}

pub fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("csv") => "text/csv",
        Some("tsv") | Some("tab") => "text/tab-separated-values",
        Some("txt") => "text/plain",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("xls") => "application/vnd.ms-excel",
        Some("ods") => "application/vnd.oasis.opendocument.spreadsheet",
        _ => "application/octet-stream",
    }
}

pub fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_prefers_plain_utf8() {
        let (encoding, text) = detect_and_decode("id,name\n1,Zoë\n".as_bytes()).unwrap();
        assert_eq!(encoding, TextEncoding::Utf8);
        assert!(text.contains("Zoë"));
    }

    #[test]
    fn detect_strips_byte_order_mark() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"id,name\n1,a\n");
        let (encoding, text) = detect_and_decode(&bytes).unwrap();
        assert_eq!(encoding, TextEncoding::Utf8Bom);
        assert!(text.starts_with("id"));
    }

    #[test]
    fn detect_falls_back_to_latin1() {
        let (encoded, _, _) = WINDOWS_1252.encode("id,name\n1,Caf\u{e9}\n");
        let (encoding, text) = detect_and_decode(&encoded).unwrap();
        assert_eq!(encoding, TextEncoding::Latin1);
        assert!(text.contains("Caf\u{e9}"));
    }

    #[test]
    fn decode_bytes_rejects_invalid_sequences() {
        assert_eq!(decode_bytes(b"id\n1\n", UTF_8).unwrap(), "id\n1\n");
        let err = decode_bytes(&[b'a', 0xFF, b'b'], UTF_8).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn write_delimited_quotes_every_field() {
        let headers = vec!["a".to_string(), "b".to_string()];
        let rows = vec![vec!["1".to_string(), "x;y".to_string()]];
        let text = write_delimited(Some(&headers), rows.iter(), b';').unwrap();
        assert_eq!(text, "\"a\";\"b\"\n\"1\";\"x;y\"\n");
    }

    #[test]
    fn mime_for_path_uses_extension() {
        assert_eq!(mime_for_path(Path::new("data/orders.CSV")), "text/csv");
        assert_eq!(
            mime_for_path(Path::new("book.xlsx")),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
    }
}
