//! Delimited text sink

use super::{append_batch, open_append, ExportSink, OutputError, OutputResult};
use crate::Item;
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// One output column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnConfig {
    /// Header text
    pub name: String,
    /// JSON pointer into the payload.
    ///
    /// When omitted, `id`, `fetched_at` and `payload` refer to the item
    /// itself and any other name is looked up as a top-level payload field.
    #[serde(default)]
    pub pointer: Option<String>,
}

impl ColumnConfig {
    /// Column addressed by pointer
    pub fn new(name: impl Into<String>, pointer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pointer: Some(pointer.into()),
        }
    }

    pub(crate) fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pointer: None,
        }
    }

    fn render(&self, item: &Item) -> Option<String> {
        match self.pointer.as_deref() {
            Some(pointer) => item.payload.pointer(pointer).and_then(render_value),
            None => match self.name.as_str() {
                "id" => Some(item.id.to_string()),
                "fetched_at" => Some(item.fetched_at.to_rfc3339()),
                "payload" => Some(item.payload.to_string()),
                field => item.payload.get(field).and_then(render_value),
            },
        }
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Configured columns, or `id`, `fetched_at` and `payload` when none are given
pub(crate) fn resolve_columns(columns: Vec<ColumnConfig>) -> Vec<ColumnConfig> {
    if columns.is_empty() {
        ["id", "fetched_at", "payload"]
            .into_iter()
            .map(ColumnConfig::named)
            .collect()
    } else {
        columns
    }
}

/// Cell values of one item
pub(crate) fn render_row(columns: &[ColumnConfig], missing: &str, item: &Item) -> Vec<String> {
    columns
        .iter()
        .map(|column| column.render(item).unwrap_or_else(|| missing.to_string()))
        .collect()
}

/// Appends one row per item
pub struct CsvSink {
    file: File,
    path: PathBuf,
    delimiter: u8,
    columns: Vec<ColumnConfig>,
    missing: String,
    bom: bool,
    header_pending: bool,
    rows_written: u64,
}

impl CsvSink {
    /// Open `path` for appending.
    ///
    /// A new file gets the header row together with the first batch, or on
    /// [`ExportSink::finish`] when nothing was exported.
    pub fn open(
        path: &Path,
        delimiter: char,
        columns: Vec<ColumnConfig>,
        missing: String,
    ) -> OutputResult<Self> {
        if !delimiter.is_ascii() {
            return Err(OutputError::InvalidConfig(format!(
                "delimiter {delimiter:?} must be a single ASCII character"
            )));
        }
        let columns = resolve_columns(columns);

        let (file, has_data) = open_append(path)?;
        info!(path = %path.display(), append = has_data, "Opening CSV export");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            delimiter: delimiter as u8,
            columns,
            missing,
            bom: false,
            header_pending: !has_data,
            rows_written: 0,
        })
    }

    /// Start a new file with a UTF-8 byte order mark so spreadsheet programs
    /// detect the encoding. Appending to an existing file never adds one.
    pub fn with_bom(mut self, bom: bool) -> Self {
        self.bom = bom;
        self
    }

    fn header(&self) -> OutputResult<Vec<u8>> {
        let mut header = if self.bom { UTF8_BOM.to_vec() } else { Vec::new() };
        let names: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        header.extend(encode_rows(self.delimiter, [names])?);
        Ok(header)
    }
}

/// Encode whole rows so a batch reaches the file in one write
fn encode_rows(delimiter: u8, rows: impl IntoIterator<Item = Vec<String>>) -> OutputResult<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());
    for row in rows {
        writer
            .write_record(&row)
            .map_err(|e| OutputError::CsvError(format!("Failed to write row: {e}")))?;
    }
    writer
        .into_inner()
        .map_err(|e| OutputError::CsvError(format!("Failed to encode rows: {e}")))
}

impl ExportSink for CsvSink {
    fn export(&mut self, items: &[Item]) -> OutputResult<()> {
        let rows = items
            .iter()
            .map(|item| render_row(&self.columns, &self.missing, item));
        let mut batch = if self.header_pending { self.header()? } else { Vec::new() };
        batch.extend(encode_rows(self.delimiter, rows)?);
        append_batch(&mut self.file, &self.path, &batch)?;
        self.header_pending = false;
        self.rows_written += items.len() as u64;
        debug!(rows = items.len(), total = self.rows_written, "CSV batch exported");
        Ok(())
    }

    fn finish(&mut self) -> OutputResult<()> {
        if self.header_pending {
            let header = self.header()?;
            append_batch(&mut self.file, &self.path, &header)?;
            self.header_pending = false;
        }
        self.file
            .sync_data()
            .map_err(|e| OutputError::FlushError(format!("Failed to sync: {e}")))?;
        info!(path = %self.path.display(), rows = self.rows_written, "CSV export closed");
        Ok(())
    }

    fn exported(&self) -> u64 {
        self.rows_written
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
