//! Durable collection state
//!
//! Written atomically (temp file, fsync, rename) and tagged with a schema
//! version so an incompatible file is rejected instead of misread.

use super::cursor::Cursor;
use crate::registry::StrategyConfig;
use crate::ItemId;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Current checkpoint schema version
pub const STATE_SCHEMA_VERSION: &str = "1.0.0";

/// Maximum accepted checkpoint size (256 MB)
pub const MAX_STATE_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Resumable state of one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionState {
    schema_version: String,
    target: String,
    /// Collected ids mapped to their payload digest
    collected: BTreeMap<ItemId, String>,
    cursor: Cursor,
    #[serde(default)]
    total_target: Option<u64>,
    #[serde(default)]
    highest_present: Option<u64>,
    #[serde(default)]
    failed: BTreeSet<u64>,
    #[serde(default)]
    last_checkpoint_at: Option<DateTime<Utc>>,
    #[serde(default)]
    run_count: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CollectionState {
    /// Empty state positioned at the start of `strategy`
    pub fn new(target: impl Into<String>, strategy: &StrategyConfig) -> Self {
        let now = Utc::now();
        Self {
            schema_version: STATE_SCHEMA_VERSION.to_string(),
            target: target.into(),
            collected: BTreeMap::new(),
            cursor: Cursor::start(strategy),
            total_target: None,
            highest_present: None,
            failed: BTreeSet::new(),
            last_checkpoint_at: None,
            run_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Target id
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Number of distinct items collected
    pub fn collected_count(&self) -> usize {
        self.collected.len()
    }

    /// Whether `id` has been collected
    pub fn contains(&self, id: &ItemId) -> bool {
        self.collected.contains_key(id)
    }

    /// Stored payload digest for `id`
    pub fn digest_of(&self, id: &ItemId) -> Option<&str> {
        self.collected.get(id).map(String::as_str)
    }

    /// Collected ids in ascending order
    pub fn collected_ids(&self) -> impl Iterator<Item = &ItemId> {
        self.collected.keys()
    }

    /// Record `id` with its digest, returning the previous digest
    pub fn record(&mut self, id: ItemId, digest: String) -> Option<String> {
        self.updated_at = Utc::now();
        self.collected.insert(id, digest)
    }

    /// Resume position
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Move the resume position
    pub fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = cursor;
        self.updated_at = Utc::now();
    }

    /// Known collection size
    pub fn total_target(&self) -> Option<u64> {
        self.total_target
    }

    /// Seed or revise the collection size
    pub fn set_total_target(&mut self, total: Option<u64>) {
        self.total_target = total;
    }

    /// Highest ordinal that produced at least one item
    pub fn highest_present(&self) -> Option<u64> {
        self.highest_present
    }

    /// Note an ordinal that produced items
    pub fn note_present(&mut self, ordinal: u64) {
        self.highest_present = Some(self.highest_present.map_or(ordinal, |h| h.max(ordinal)));
    }

    /// Ordinals that failed permanently
    pub fn failed(&self) -> &BTreeSet<u64> {
        &self.failed
    }

    /// Record a permanently failed ordinal
    pub fn mark_failed(&mut self, ordinal: u64) {
        self.failed.insert(ordinal);
    }

    /// Forget a failure once the ordinal has been fetched
    pub fn clear_failed(&mut self, ordinal: u64) {
        self.failed.remove(&ordinal);
    }

    /// When the state was last checkpointed
    pub fn last_checkpoint_at(&self) -> Option<DateTime<Utc>> {
        self.last_checkpoint_at
    }

    /// Stamp a checkpoint
    pub fn mark_checkpoint(&mut self, at: DateTime<Utc>) {
        self.last_checkpoint_at = Some(at);
        self.updated_at = at;
    }

    /// Runs started against this state
    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    /// Count a new run
    pub fn begin_run(&mut self) {
        self.run_count += 1;
        self.updated_at = Utc::now();
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last mutation time
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Validate schema version
    pub fn validate_schema_version(&self) -> Result<(), ResumeError> {
        if self.schema_version != STATE_SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: STATE_SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        Ok(())
    }
}

/// Serialize `value` to `path` atomically.
///
/// The JSON goes to a temp file in the same directory, is flushed and synced,
/// then renamed over `path`; the directory is synced afterwards so the rename
/// survives a crash.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ResumeError> {
    let parent_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent_dir).map_err(|e| ResumeError::IoError(e.to_string()))?;

    let json =
        serde_json::to_vec(value).map_err(|e| ResumeError::SerializationError(e.to_string()))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(&parent_dir)
        .map_err(|e| ResumeError::IoError(format!("failed to create temp file: {e}")))?;
    temp_file
        .write_all(&json)
        .map_err(|e| ResumeError::IoError(format!("failed to write temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| ResumeError::IoError(format!("failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| ResumeError::IoError(format!("failed to sync temp file: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| ResumeError::IoError(format!("failed to persist temp file: {e}")))?;

    if let Ok(dir) = std::fs::File::open(&parent_dir) {
        let _ = dir.sync_all();
    }

    debug!(path = %path.display(), bytes = json.len(), "Wrote file atomically");
    Ok(())
}

/// Read JSON written by [`write_json_atomic`], enforcing the size cap.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ResumeError> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ResumeError::IoError(e.to_string())),
    };
    if metadata.len() > MAX_STATE_FILE_SIZE {
        return Err(ResumeError::StateTooLarge {
            size: metadata.len(),
            max: MAX_STATE_FILE_SIZE,
        });
    }

    let contents = std::fs::read(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
    serde_json::from_slice(&contents).map(Some).map_err(|e| {
        warn!(path = %path.display(), error = %e, "Failed to deserialize");
        ResumeError::DeserializationError(e.to_string())
    })
}

/// Errors related to checkpoint state
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// State file too large
    #[error("state file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// Checkpoint belongs to another target or strategy
    #[error("checkpoint does not match target: {0}")]
    TargetMismatch(String),

    /// Another process holds the checkpoint lock
    #[error("checkpoint {} is locked by another run{}", path.display(), holder.map(|pid| format!(" (pid {pid})")).unwrap_or_default())]
    Locked {
        /// Lock file path
        path: PathBuf,
        /// Pid recorded by the holder, if readable
        holder: Option<u32>,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}
