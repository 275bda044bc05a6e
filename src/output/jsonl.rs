//! JSON Lines sink

use super::{append_batch, open_append, ExportSink, OutputError, OutputResult};
use crate::Item;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Appends each item as one JSON object per line
pub struct JsonlSink {
    file: File,
    path: PathBuf,
    written: u64,
}

impl JsonlSink {
    /// Open `path` for appending
    pub fn open(path: &Path) -> OutputResult<Self> {
        let (file, _) = open_append(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            written: 0,
        })
    }
}

impl ExportSink for JsonlSink {
    fn export(&mut self, items: &[Item]) -> OutputResult<()> {
        let mut batch = Vec::new();
        for item in items {
            serde_json::to_writer(&mut batch, item)
                .map_err(|e| OutputError::SerializationError(e.to_string()))?;
            batch.push(b'\n');
        }
        append_batch(&mut self.file, &self.path, &batch)?;
        self.written += items.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> OutputResult<()> {
        self.file
            .sync_data()
            .map_err(|e| OutputError::FlushError(e.to_string()))
    }

    fn exported(&self) -> u64 {
        self.written
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
