//! Link list sink

use super::{append_batch, open_append, ExportSink, OutputError, OutputResult};
use crate::Item;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes one URL per distinct item id.
///
/// Lines already present in the file (from earlier runs) are not repeated, so
/// re-exported updates do not duplicate links.
pub struct LinksSink {
    file: File,
    path: PathBuf,
    template: String,
    seen: HashSet<String>,
    written: u64,
}

impl LinksSink {
    /// Open `path` for appending; `template` must contain `{id}`
    pub fn open(path: &Path, template: &str) -> OutputResult<Self> {
        if !template.contains("{id}") {
            return Err(OutputError::InvalidConfig(format!(
                "link template '{template}' has no {{id}} placeholder"
            )));
        }

        let mut seen = HashSet::new();
        if let Ok(existing) = File::open(path) {
            for line in BufReader::new(existing).lines() {
                let line = line.map_err(|e| OutputError::IoError(e.to_string()))?;
                if !line.is_empty() {
                    seen.insert(line);
                }
            }
            debug!(path = %path.display(), existing = seen.len(), "Loaded existing links");
        }

        let (file, _) = open_append(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            template: template.to_string(),
            seen,
            written: 0,
        })
    }
}

impl ExportSink for LinksSink {
    fn export(&mut self, items: &[Item]) -> OutputResult<()> {
        let mut fresh = Vec::new();
        for item in items {
            let link = self.template.replace("{id}", item.id.as_str());
            if !self.seen.contains(&link) && !fresh.contains(&link) {
                fresh.push(link);
            }
        }
        let batch: String = fresh.iter().map(|link| format!("{link}\n")).collect();
        append_batch(&mut self.file, &self.path, batch.as_bytes())?;
        self.written += fresh.len() as u64;
        self.seen.extend(fresh);
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
