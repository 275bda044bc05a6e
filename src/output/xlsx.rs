//! Spreadsheet sink
//!
//! A workbook cannot be appended to, so each exported batch is rendered and
//! appended to a JSON Lines sidecar (`<path>.rows.jsonl`). `finish` rebuilds
//! the workbook from the sidecar and replaces the previous one atomically, so
//! a resumed run produces a workbook holding the rows of every run.

use super::csv::{render_row, resolve_columns};
use super::{append_batch, open_append, ColumnConfig, ExportSink, OutputError, OutputResult};
use crate::Item;
use rust_xlsxwriter::Workbook;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Rows per worksheet, header included
const MAX_SHEET_ROWS: usize = 1_048_576;

/// Characters per cell
const MAX_CELL_CHARS: usize = 32_767;

const SHEET_NAME: &str = "items";

/// Collects rendered rows and writes them as an `.xlsx` workbook
pub struct XlsxSink {
    rows: File,
    rows_path: PathBuf,
    path: PathBuf,
    columns: Vec<ColumnConfig>,
    missing: String,
    written: u64,
}

impl XlsxSink {
    /// Open the sidecar of `path` for appending
    pub fn open(path: &Path, columns: Vec<ColumnConfig>, missing: String) -> OutputResult<Self> {
        let columns = resolve_columns(columns);
        if columns.len() > usize::from(u16::MAX) {
            return Err(OutputError::InvalidConfig(format!(
                "{} columns do not fit in a worksheet",
                columns.len()
            )));
        }

        let rows_path = sidecar_path(path);
        let (rows, has_data) = open_append(&rows_path)?;
        info!(
            path = %path.display(),
            rows = %rows_path.display(),
            append = has_data,
            "Opening XLSX export"
        );

        Ok(Self {
            rows,
            rows_path,
            path: path.to_path_buf(),
            columns,
            missing,
            written: 0,
        })
    }

    /// Where rendered rows are kept between checkpoints
    pub fn rows_path(&self) -> &Path {
        &self.rows_path
    }

    fn load_rows(&self) -> OutputResult<Vec<Vec<String>>> {
        let file = File::open(&self.rows_path).map_err(|e| {
            OutputError::IoError(format!("Failed to open {}: {e}", self.rows_path.display()))
        })?;
        let mut rows = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| OutputError::IoError(e.to_string()))?;
            if line.is_empty() {
                continue;
            }
            let row = serde_json::from_str(&line)
                .map_err(|e| OutputError::SerializationError(format!("Bad row in sidecar: {e}")))?;
            rows.push(row);
        }
        Ok(rows)
    }

    fn build_workbook(&self, rows: &[Vec<String>]) -> OutputResult<Vec<u8>> {
        let mut workbook = Workbook::new();
        for (name, chunk) in split_sheets(rows, MAX_SHEET_ROWS - 1) {
            let sheet = workbook.add_worksheet().set_name(&name).map_err(xlsx_error)?;
            for (col, column) in self.columns.iter().enumerate() {
                sheet
                    .write_string(0, cell_col(col)?, cell_text(&column.name))
                    .map_err(xlsx_error)?;
            }
            for (offset, row) in chunk.iter().enumerate() {
                let r = u32::try_from(offset + 1)
                    .map_err(|_| OutputError::XlsxError(format!("row {} out of range", offset + 1)))?;
                for (col, value) in row.iter().enumerate() {
                    sheet
                        .write_string(r, cell_col(col)?, cell_text(value))
                        .map_err(xlsx_error)?;
                }
            }
        }
        workbook.save_to_buffer().map_err(xlsx_error)
    }
}

impl ExportSink for XlsxSink {
    fn export(&mut self, items: &[Item]) -> OutputResult<()> {
        let mut batch = Vec::new();
        for item in items {
            let row = render_row(&self.columns, &self.missing, item);
            serde_json::to_writer(&mut batch, &row)
                .map_err(|e| OutputError::SerializationError(e.to_string()))?;
            batch.push(b'\n');
        }
        append_batch(&mut self.rows, &self.rows_path, &batch)?;
        self.written += items.len() as u64;
        debug!(rows = items.len(), total = self.written, "XLSX rows staged");
        Ok(())
    }

    fn finish(&mut self) -> OutputResult<()> {
        let rows = self.load_rows()?;
        let workbook = self.build_workbook(&rows)?;
        write_atomic(&self.path, &workbook)?;
        info!(path = %self.path.display(), rows = rows.len(), "XLSX export written");
        Ok(())
    }

    fn exported(&self) -> u64 {
        self.written
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".rows.jsonl");
    PathBuf::from(name)
}

/// Worksheet names and the rows each holds; always at least one sheet
fn split_sheets(rows: &[Vec<String>], per_sheet: usize) -> Vec<(String, &[Vec<String>])> {
    if rows.is_empty() {
        return vec![(SHEET_NAME.to_string(), rows)];
    }
    rows.chunks(per_sheet.max(1))
        .enumerate()
        .map(|(index, chunk)| {
            let name = match index {
                0 => SHEET_NAME.to_string(),
                n => format!("{SHEET_NAME}_{}", n + 1),
            };
            (name, chunk)
        })
        .collect()
}

fn cell_col(col: usize) -> OutputResult<u16> {
    u16::try_from(col).map_err(|_| OutputError::XlsxError(format!("column {col} out of range")))
}

fn cell_text(value: &str) -> &str {
    match value.char_indices().nth(MAX_CELL_CHARS) {
        Some((end, _)) => &value[..end],
        None => value,
    }
}

fn xlsx_error(e: rust_xlsxwriter::XlsxError) -> OutputError {
    OutputError::XlsxError(e.to_string())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> OutputResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| OutputError::IoError(format!("Failed to create temp file: {e}")))?;
    temp.write_all(bytes)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| OutputError::IoError(format!("Failed to write temp file: {e}")))?;
    temp.persist(path)
        .map_err(|e| OutputError::IoError(format!("Failed to replace {}: {e}", path.display())))?;
    Ok(())
}
