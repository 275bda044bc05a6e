//! Export sinks
//!
//! A sink receives the items accepted (added or updated) since the previous
//! checkpoint and appends them to a durable file. Sinks never touch the
//! checkpoint; a failed export leaves collection state as it is.

use crate::Item;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub mod csv;
pub mod jsonl;
pub mod links;
pub mod xlsx;

pub use self::csv::{ColumnConfig, CsvSink};
pub use jsonl::JsonlSink;
pub use links::LinksSink;
pub use xlsx::XlsxSink;

/// Output errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),

    /// Workbook build or save error
    #[error("XLSX error: {0}")]
    XlsxError(String),

    /// Sink configuration is unusable
    #[error("invalid export configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Destination for accepted items
pub trait ExportSink: Send {
    /// Append a batch and make it durable
    fn export(&mut self, items: &[Item]) -> OutputResult<()>;

    /// Flush and close at the end of a run
    fn finish(&mut self) -> OutputResult<()>;

    /// Records written by this sink instance
    fn exported(&self) -> u64;

    /// Output file
    fn path(&self) -> &Path;
}

/// Export configuration as written in the registry file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case", deny_unknown_fields)]
pub enum ExportConfig {
    /// Delimited text with one row per item
    Csv {
        /// Output file
        path: PathBuf,
        /// Field delimiter
        #[serde(default = "default_delimiter")]
        delimiter: char,
        /// Columns; `id`, `fetched_at` and `payload` when empty
        #[serde(default)]
        columns: Vec<ColumnConfig>,
        /// Text written for absent or null fields
        #[serde(default)]
        missing: String,
        /// Start a new file with a UTF-8 byte order mark
        #[serde(default)]
        bom: bool,
    },
    /// Spreadsheet rebuilt from all exported rows when the run ends
    Xlsx {
        /// Output workbook
        path: PathBuf,
        /// Columns; `id`, `fetched_at` and `payload` when empty
        #[serde(default)]
        columns: Vec<ColumnConfig>,
        /// Text written for absent or null fields
        #[serde(default)]
        missing: String,
    },
    /// One JSON object per line
    Jsonl {
        /// Output file
        path: PathBuf,
    },
    /// One URL per item, built from a `{id}` template
    Links {
        /// Output file
        path: PathBuf,
        /// URL template
        template: String,
    },
}

fn default_delimiter() -> char {
    ';'
}

impl ExportConfig {
    /// Output file
    pub fn path(&self) -> &Path {
        match self {
            ExportConfig::Csv { path, .. }
            | ExportConfig::Xlsx { path, .. }
            | ExportConfig::Jsonl { path }
            | ExportConfig::Links { path, .. } => path,
        }
    }

    /// Open the sink for appending
    pub fn open(&self) -> OutputResult<Box<dyn ExportSink>> {
        Ok(match self {
            ExportConfig::Csv {
                path,
                delimiter,
                columns,
                missing,
                bom,
            } => Box::new(
                CsvSink::open(path, *delimiter, columns.clone(), missing.clone())?.with_bom(*bom),
            ),
            ExportConfig::Xlsx {
                path,
                columns,
                missing,
            } => Box::new(XlsxSink::open(path, columns.clone(), missing.clone())?),
            ExportConfig::Jsonl { path } => Box::new(JsonlSink::open(path)?),
            ExportConfig::Links { path, template } => Box::new(LinksSink::open(path, template)?),
        })
    }
}

/// Open `path` for appending, creating parent directories.
///
/// Returns the file and whether it already held data.
pub(crate) fn open_append(path: &Path) -> OutputResult<(File, bool)> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OutputError::IoError(format!("Failed to create directory: {e}")))?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| OutputError::IoError(format!("Failed to open {}: {e}", path.display())))?;
    let has_data = file
        .metadata()
        .map(|m| m.len() > 0)
        .map_err(|e| OutputError::IoError(e.to_string()))?;
    Ok((file, has_data))
}

/// File that batches are appended to and can be cut back on failure
pub(crate) trait AppendTarget: Write {
    /// Current length in bytes
    fn len(&self) -> io::Result<u64>;

    /// Cut the file back to `len` bytes
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl AppendTarget for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append a fully rendered batch.
///
/// A batch lands whole or not at all: on a failed write the target is cut
/// back to its length before the batch, so a retried export never leaves
/// duplicate rows behind.
pub(crate) fn append_batch<T: AppendTarget>(target: &mut T, path: &Path, batch: &[u8]) -> OutputResult<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let start = target
        .len()
        .map_err(|e| OutputError::IoError(format!("Failed to stat {}: {e}", path.display())))?;
    let written = target.write_all(batch).and_then(|()| target.flush());
    let Err(e) = written else {
        return Ok(());
    };
    if let Err(rollback) = target.truncate(start) {
        warn!(
            path = %path.display(),
            error = %rollback,
            "Failed to roll back a partial batch"
        );
    }
    Err(OutputError::IoError(format!("Failed to append to {}: {e}", path.display())))
}
