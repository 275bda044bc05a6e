//! Collection defaults and per-run settings

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of concurrently in-flight requests
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Upper bound accepted for concurrency
pub const MAX_CONCURRENCY: usize = 64;

/// Default total attempts per page request (first try included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default first backoff step
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Cap for computed backoff
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Jitter as a fraction of the base delay
pub const DEFAULT_JITTER_FRACTION: f64 = 0.25;

/// Per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Wall-clock interval between checkpoints
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(30);

/// Accepted items between checkpoints
pub const DEFAULT_CHECKPOINT_EVERY_ITEMS: u64 = 500;

/// Consecutive empty results that end an unbounded sweep
pub const DEFAULT_EMPTY_THRESHOLD: u64 = 3;

/// Failed/issued ratio above which the run aborts
pub const DEFAULT_FAILURE_RATE_THRESHOLD: f64 = 0.5;

/// Requests issued before the failure-rate check applies
pub const DEFAULT_FAILURE_RATE_MIN_REQUESTS: u64 = 20;

/// Page size used when a paged target does not set one
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Interval between `[PROGRESS]` log lines
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

/// Tunables for one collection run.
///
/// Loaded from the `[defaults]` table of the registry file, overlaid with a
/// target's own `settings` table and finally with CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorSettings {
    /// Concurrently in-flight requests
    pub concurrency: usize,
    /// Total attempts per page request
    pub max_attempts: u32,
    /// First backoff step in milliseconds
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the base delay
    pub jitter: f64,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Optional pacing budget
    pub requests_per_minute: Option<usize>,
    /// Seconds between checkpoints
    pub checkpoint_interval_secs: u64,
    /// Accepted items between checkpoints
    pub checkpoint_every_items: u64,
    /// Consecutive empty results that end an unbounded sweep
    pub empty_threshold: u64,
    /// Failed/issued ratio above which the run aborts
    pub failure_rate_threshold: f64,
    /// Requests issued before the failure-rate check applies
    pub failure_rate_min_requests: u64,
    /// Seconds between progress log lines
    pub progress_interval_secs: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
            max_delay_ms: DEFAULT_MAX_DELAY.as_millis() as u64,
            jitter: DEFAULT_JITTER_FRACTION,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            requests_per_minute: None,
            checkpoint_interval_secs: DEFAULT_CHECKPOINT_INTERVAL.as_secs(),
            checkpoint_every_items: DEFAULT_CHECKPOINT_EVERY_ITEMS,
            empty_threshold: DEFAULT_EMPTY_THRESHOLD,
            failure_rate_threshold: DEFAULT_FAILURE_RATE_THRESHOLD,
            failure_rate_min_requests: DEFAULT_FAILURE_RATE_MIN_REQUESTS,
            progress_interval_secs: DEFAULT_PROGRESS_INTERVAL.as_secs(),
        }
    }
}

impl CollectorSettings {
    /// Validate settings integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".to_string());
        }
        if self.concurrency > MAX_CONCURRENCY {
            return Err(format!(
                "concurrency {} exceeds maximum of {MAX_CONCURRENCY}",
                self.concurrency
            ));
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(format!(
                "max_delay_ms ({}) must be >= base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!("jitter must be within 0.0..=1.0, got {}", self.jitter));
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be positive".to_string());
        }
        if self.requests_per_minute == Some(0) {
            return Err("requests_per_minute must be positive when set".to_string());
        }
        if self.empty_threshold == 0 {
            return Err("empty_threshold must be at least 1".to_string());
        }
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 1.0) {
            return Err(format!(
                "failure_rate_threshold must be within (0.0, 1.0], got {}",
                self.failure_rate_threshold
            ));
        }
        Ok(())
    }

    /// Retry policy described by these settings
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter(self.jitter)
    }

    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Wall-clock interval between checkpoints
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs.max(1))
    }

    /// Interval between progress log lines
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs.max(1))
    }
}
