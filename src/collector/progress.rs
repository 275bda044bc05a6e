//! Progress reporting for long-running sweeps.
//!
//! [`ProgressState`] computes rate and ETA for the periodic `[PROGRESS]` log
//! line. [`ProgressHandle`] publishes a small snapshot of the run that other
//! tasks (the CLI progress bar) can read without touching collection state.

use crate::resume::Cursor;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Loading the checkpoint and querying the total
    #[default]
    Initializing,
    /// Issuing requests
    Running,
    /// Window exhausted
    Completed,
    /// Stopped by an authentication failure or the failure-rate ceiling
    Aborted,
    /// Stopped by an operator interrupt; resumable
    Paused,
}

impl RunPhase {
    /// Whether the run has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Aborted | RunPhase::Paused)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunPhase::Initializing => "initializing",
            RunPhase::Running => "running",
            RunPhase::Completed => "completed",
            RunPhase::Aborted => "aborted",
            RunPhase::Paused => "paused",
        })
    }
}

/// Point-in-time view of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Current phase
    pub phase: RunPhase,
    /// Distinct items held in collection state
    pub collected: usize,
    /// Known collection size
    pub total_target: Option<u64>,
    /// Resume position
    pub cursor: Option<Cursor>,
    /// Requests issued this run
    pub issued: u64,
    /// Requests in flight
    pub in_flight: usize,
    /// Permanent failures this run
    pub failed: u64,
}

/// Shared, read-only view of a running orchestrator
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    inner: Arc<RwLock<ProgressSnapshot>>,
}

impl ProgressHandle {
    /// Latest published snapshot
    pub fn snapshot(&self) -> ProgressSnapshot {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn publish(&self, snapshot: ProgressSnapshot) {
        match self.inner.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}

/// Rate and ETA tracking for the `[PROGRESS]` log line.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Items accepted during this run
    pub items_collected: u64,
    /// Items already held when the run started
    pub baseline: u64,
    /// Known collection size
    pub total_expected: Option<u64>,
    /// Run start
    pub start_time: Instant,
    /// Last emitted update
    pub last_update: Instant,
    /// Minimum interval between updates
    pub update_interval: Duration,
    /// Items accepted per second this run
    pub current_rate: f64,
    /// Position label, e.g. "page 12 of 40"
    pub current_phase: Option<String>,
}

impl ProgressState {
    /// Tracker for a run starting with `baseline` items already collected
    pub fn new(baseline: u64, total_expected: Option<u64>, update_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            items_collected: 0,
            baseline,
            total_expected,
            start_time: now,
            last_update: now,
            update_interval,
            current_rate: 0.0,
            current_phase: None,
        }
    }

    /// Add newly accepted items
    pub fn update(&mut self, new_items: u64) {
        self.items_collected = self.items_collected.saturating_add(new_items);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.current_rate = self.items_collected as f64 / elapsed;
        }
    }

    /// Whether the update interval has passed
    pub fn should_emit_update(&self) -> bool {
        self.last_update.elapsed() >= self.update_interval
    }

    /// Reset the update timer
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
    }

    /// Set the position label
    pub fn set_phase<S: Into<String>>(&mut self, phase: Option<S>) {
        self.current_phase = phase.map(Into::into);
    }

    /// Total items held, including the baseline
    pub fn total_collected(&self) -> u64 {
        self.baseline + self.items_collected
    }

    /// Completion percentage when the total is known
    pub fn percentage(&self) -> Option<f64> {
        let total = self.total_expected?;
        if total == 0 {
            return Some(100.0);
        }
        Some((self.total_collected() as f64 / total as f64 * 100.0).min(100.0))
    }

    /// Remaining time at the current rate
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.current_rate <= 0.0 {
            return None;
        }
        let remaining = self.total_expected?.saturating_sub(self.total_collected());
        (remaining > 0).then(|| Duration::from_secs_f64(remaining as f64 / self.current_rate))
    }

    /// Human-readable progress line
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!("[PROGRESS] Collected {} items", self.total_collected())];

        if let Some(pct) = self.percentage() {
            parts.push(format!("- {pct:.1}% complete"));
        }
        if let Some(phase) = &self.current_phase {
            parts.push(format!("({phase})"));
        }
        if self.current_rate > 0.0 {
            parts.push(format!("at {:.1} items/sec", self.current_rate));
        }
        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

/// Compact duration for log lines
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
