//! Run statistics and the end-of-run summary

use super::accumulator::AbsorbSummary;
use crate::retry::{FailureKind, FetchFailure};
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Counters for one run, written to `<target>.stats.json` at the end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Target id
    pub target: String,
    /// Final outcome label, set when the run ends
    #[serde(default)]
    pub outcome: Option<String>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Logical page requests issued
    pub issued: u64,
    /// Requests that produced a schema-valid response
    pub succeeded: u64,
    /// Successful requests that needed at least one retry
    pub retried_then_succeeded: u64,
    /// Requests answered with 404
    pub not_found: u64,
    /// Well-formed responses without items
    pub empty: u64,
    /// Requests that failed permanently
    pub failed: u64,
    /// Permanent failures by category
    pub failed_by_kind: BTreeMap<FailureKind, u64>,
    /// Retry events by category
    pub retries_by_kind: BTreeMap<FailureKind, u64>,
    /// Absorb outcome totals
    pub items: AbsorbSummary,
    /// Checkpoints written
    pub checkpoints: u64,
    /// Export batches that failed and were carried forward
    pub export_failures: u64,
}

impl RunStats {
    /// Empty statistics for a run starting now
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            outcome: None,
            started_at: Utc::now(),
            finished_at: None,
            issued: 0,
            succeeded: 0,
            retried_then_succeeded: 0,
            not_found: 0,
            empty: 0,
            failed: 0,
            failed_by_kind: BTreeMap::new(),
            retries_by_kind: BTreeMap::new(),
            items: AbsorbSummary::default(),
            checkpoints: 0,
            export_failures: 0,
        }
    }

    /// Count an issued request
    pub fn record_issued(&mut self) {
        self.issued += 1;
    }

    /// Count a successful request and the retries it took
    pub fn record_success(&mut self, retried: &[FailureKind], empty: bool) {
        self.succeeded += 1;
        if !retried.is_empty() {
            self.retried_then_succeeded += 1;
        }
        if empty {
            self.empty += 1;
        }
        self.record_retries(retried);
    }

    /// Count a 404
    pub fn record_not_found(&mut self, retried: &[FailureKind]) {
        self.not_found += 1;
        self.record_retries(retried);
    }

    /// Count a permanent failure
    pub fn record_failure(&mut self, failure: &FetchFailure) {
        self.failed += 1;
        *self.failed_by_kind.entry(failure.kind).or_default() += 1;
        self.record_retries(&failure.retried);
        metrics::record_failure(failure.kind);
    }

    /// Add absorb counts
    pub fn record_absorb(&mut self, summary: AbsorbSummary) {
        self.items += summary;
    }

    fn record_retries(&mut self, retried: &[FailureKind]) {
        for kind in retried {
            *self.retries_by_kind.entry(*kind).or_default() += 1;
        }
    }

    /// Total retry events
    pub fn retries(&self) -> u64 {
        self.retries_by_kind.values().sum()
    }

    /// Failed / issued
    pub fn failure_rate(&self) -> f64 {
        if self.issued == 0 {
            0.0
        } else {
            self.failed as f64 / self.issued as f64
        }
    }

    /// Close the run with an outcome label
    pub fn finish(&mut self, outcome: impl Into<String>) {
        self.outcome = Some(outcome.into());
        self.finished_at = Some(Utc::now());
    }

    /// Multi-line human summary
    pub fn format_summary(&self) -> String {
        let mut out = String::new();
        let elapsed = self
            .finished_at
            .unwrap_or_else(Utc::now)
            .signed_duration_since(self.started_at)
            .num_seconds()
            .max(0);

        let _ = writeln!(
            out,
            "Run summary for '{}': {} in {}s",
            self.target,
            self.outcome.as_deref().unwrap_or("running"),
            elapsed
        );
        let _ = writeln!(out, "  requests issued:      {}", self.issued);
        let _ = writeln!(
            out,
            "  succeeded:            {} ({} after retries)",
            self.succeeded, self.retried_then_succeeded
        );
        let _ = writeln!(
            out,
            "  not found / empty:    {} / {}",
            self.not_found, self.empty
        );
        let _ = writeln!(out, "  permanently failed:   {}", self.failed);
        let _ = writeln!(out, "  retry events:         {}", self.retries());
        let _ = writeln!(out, "  failures by category: {}", by_kind(&self.failed_by_kind));
        let _ = writeln!(out, "  retries by category:  {}", by_kind(&self.retries_by_kind));
        let _ = write!(
            out,
            "  items:                {} added, {} updated, {} unchanged",
            self.items.added, self.items.updated, self.items.skipped
        );
        if self.export_failures > 0 {
            let _ = write!(out, "\n  export failures:      {}", self.export_failures);
        }
        out
    }
}

fn by_kind(counts: &BTreeMap<FailureKind, u64>) -> String {
    FailureKind::REPORTED
        .iter()
        .map(|kind| format!("{kind}={}", counts.get(kind).copied().unwrap_or(0)))
        .collect::<Vec<_>>()
        .join(" ")
}
