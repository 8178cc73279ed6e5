//! Tabular file reader.
//!
//! Turns a raw POS export (Excel workbook or delimited text) into an
//! ordered sequence of header→value rows, honoring a per-source
//! "skip first N rows" offset. Rows with the wrong cell count become
//! `MALFORMED_ROW` rejections and reading continues; the reader never
//! fails on a single bad row.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};

use crate::error::{ReasonCode, RejectionRecord};
use crate::models::SourceFile;

const EXCEL_EXTENSIONS: &[&str] = &["xls", "xlsx", "xlsm", "xlsb", "ods"];

/// One data row: header label → raw cell value, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 0-based index among the data rows (header excluded).
    pub index: usize,
    pub cells: Vec<(String, String)>,
}

impl RawRow {
    /// Look up a cell by column-name aliases, case-insensitively.
    /// Exact matches win over substring matches; empty cells read as
    /// absent.
    pub fn get(&self, aliases: &[&str]) -> Option<&str> {
        for (header, value) in &self.cells {
            let header = header.trim().to_lowercase();
            if aliases.iter().any(|a| header == *a) {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
        for (header, value) in &self.cells {
            let header = header.trim().to_lowercase();
            if aliases.iter().any(|a| header.contains(a)) {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|(_, value)| value.trim().is_empty())
    }

    /// Compact snapshot of the non-empty cells for the rejection log.
    pub fn snapshot(&self) -> String {
        self.cells
            .iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(header, value)| format!("{}={}", header.trim(), value.trim()))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A fully read source file: headers, data rows, and any rows the
/// reader itself had to reject.
#[derive(Debug)]
pub struct ParsedTable {
    pub source: SourceFile,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    pub rejections: Vec<RejectionRecord>,
}

/// Read one export file, dispatching on extension: Excel workbooks go
/// through calamine, everything else is decoded and parsed as
/// delimited text.
pub fn read_table(path: &Path, source: SourceFile, skip_rows: usize) -> Result<ParsedTable> {
    if is_excel(path) {
        read_workbook(path, source, skip_rows)
    } else {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let content = decode_bytes(&bytes);
        parse_delimited(&content, source, skip_rows)
    }
}

fn is_excel(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| EXCEL_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// UTF-8 with a Windows-1252 fallback; POS exports are saved from
/// Excel on Windows often enough that lossy UTF-8 is not good enough.
fn decode_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

fn clean_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').trim().to_string()
}

fn read_workbook(path: &Path, source: SourceFile, skip_rows: usize) -> Result<ParsedTable> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("failed to open workbook {}", path.display()))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let sheet_name = sheet_names
        .first()
        .context("workbook has no sheets")?
        .clone();
    let range = workbook
        .worksheet_range(&sheet_name)
        .with_context(|| format!("failed to read sheet '{sheet_name}'"))?;

    let mut sheet_rows = range.rows().skip(skip_rows);
    let headers: Vec<String> = sheet_rows
        .next()
        .with_context(|| format!("no header row after skipping {skip_rows} rows"))?
        .iter()
        .map(|cell| clean_header(&cell_to_string(cell)))
        .collect();

    let mut rows = Vec::new();
    for (index, sheet_row) in sheet_rows.enumerate() {
        let cells: Vec<(String, String)> = headers
            .iter()
            .enumerate()
            .map(|(col, header)| {
                let value = sheet_row.get(col).map(cell_to_string).unwrap_or_default();
                (header.clone(), value)
            })
            .collect();
        let row = RawRow { index, cells };
        if row.is_empty() {
            continue;
        }
        rows.push(row);
    }

    // Excel ranges are rectangular, so the workbook path cannot
    // produce malformed rows.
    Ok(ParsedTable {
        source,
        headers,
        rows,
        rejections: Vec::new(),
    })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => format!("{f}"),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => format!("{}", dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
    }
}

fn parse_delimited(content: &str, source: SourceFile, skip_rows: usize) -> Result<ParsedTable> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let content = skip_lines(content, skip_rows)
        .with_context(|| format!("file has fewer than {skip_rows} rows to skip"))?;

    let header_line = content.lines().next().unwrap_or("");
    let delimiter = sniff_delimiter(header_line);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("failed to read header row")?
        .iter()
        .map(clean_header)
        .collect();

    let mut rows = Vec::new();
    let mut rejections = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                rejections.push(RejectionRecord {
                    source_file: source,
                    row_index: index,
                    reason: ReasonCode::MalformedRow,
                    raw_snapshot: e.to_string(),
                });
                continue;
            }
        };

        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        if record.len() != headers.len() {
            rejections.push(RejectionRecord {
                source_file: source,
                row_index: index,
                reason: ReasonCode::MalformedRow,
                raw_snapshot: record.iter().collect::<Vec<_>>().join("|"),
            });
            continue;
        }

        let cells = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| (header.clone(), value.to_string()))
            .collect();
        rows.push(RawRow { index, cells });
    }

    Ok(ParsedTable {
        source,
        headers,
        rows,
        rejections,
    })
}

fn skip_lines(content: &str, n: usize) -> Option<&str> {
    let mut rest = content;
    for _ in 0..n {
        let newline = rest.find('\n')?;
        rest = &rest[newline + 1..];
    }
    Some(rest)
}

/// Pick the delimiter with the most occurrences in the header line,
/// mirroring the comma/tab/semicolon fallbacks the exports need.
fn sniff_delimiter(header_line: &str) -> u8 {
    [b',', b'\t', b';']
        .into_iter()
        .max_by_key(|d| header_line.bytes().filter(|b| b == d).count())
        .unwrap_or(b',')
}

// =============================================================================
// TESTS
// =============================================================================
