//! Collection orchestration
//!
//! - [`accumulator`] - Idempotent merge of fetched items into collection state
//! - [`frontier`] - Which page or id to request next and when a sweep ends
//! - [`orchestrator`] - The run state machine
//! - [`progress`] - Progress snapshots and `[PROGRESS]` log lines
//! - [`stats`] - Run counters and the end-of-run summary
//! - [`config`] - Tunables and their defaults

pub mod accumulator;
pub mod config;
pub mod frontier;
pub mod orchestrator;
pub mod progress;
pub mod stats;

pub use accumulator::{payload_digest, AbsorbSummary, Accumulator};
pub use config::CollectorSettings;
pub use frontier::{Completion, Frontier};
pub use orchestrator::{Orchestrator, RunOutcome, RunReport};
pub use progress::{ProgressHandle, ProgressSnapshot, RunPhase};
pub use stats::RunStats;

use crate::output::OutputError;
use crate::resume::ResumeError;
use crate::transport::TransportError;
use std::path::PathBuf;

/// Errors that stop a run before or after the sweep itself.
///
/// Per-request failures never surface here; they are counted in
/// [`RunStats`] and can end the run as [`RunOutcome::Aborted`].
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// Checkpoint could not be locked, read or written
    #[error("checkpoint error: {0}")]
    Resume(#[from] ResumeError),

    /// A fresh run would overwrite an existing checkpoint
    #[error("checkpoint {} already exists; resume it or reset the target first", path.display())]
    CheckpointExists {
        /// Existing state file
        path: PathBuf,
    },

    /// Export sink could not be opened or finalized
    #[error("export error: {0}")]
    Output(#[from] OutputError),

    /// Target or settings failed validation
    #[error("invalid configuration: {0}")]
    Config(String),

    /// HTTP client could not be built
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
}
