//! Retry message formatting
//!
//! Builds the consistent, operator-facing lines logged on every retry, on a
//! retry that eventually succeeds, and on final failure.

use super::FailureKind;
use std::time::Duration;

impl FailureKind {
    /// Short description used inside retry log messages
    pub fn description(&self, status: Option<u16>) -> &'static str {
        match self {
            FailureKind::Timeout => "request timeout",
            FailureKind::RetryableServer => match status {
                Some(500) => "internal server error",
                Some(502) => "bad gateway",
                Some(503) => "service unavailable",
                Some(504) => "gateway timeout",
                Some(_) => "server error",
                None => "connection failed",
            },
            FailureKind::RateLimited => "rate limit exceeded",
            FailureKind::TerminalAuth => "authentication rejected",
            FailureKind::TerminalNotFound => "not found",
            FailureKind::TerminalOther => "request rejected",
            FailureKind::SchemaMismatch => "unexpected response shape",
            FailureKind::UnknownError => "unexpected error",
            FailureKind::Cancelled => "cancelled",
        }
    }

    /// Remediation hint presented after a final failure
    pub fn suggestion(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "Raise request_timeout_secs or lower concurrency",
            FailureKind::RetryableServer => "The registry may be degraded; resume later with --resume",
            FailureKind::RateLimited => "Lower concurrency or set requests_per_minute for the target",
            FailureKind::TerminalAuth => "Refresh the bearer token supplied by the credential source",
            FailureKind::TerminalNotFound => "Check the target path and the starting page or id",
            FailureKind::TerminalOther => "Review the target's query parameters and headers",
            FailureKind::SchemaMismatch => "Check the schema pointers configured for the target",
            FailureKind::UnknownError => "Inspect the logged response and retry",
            FailureKind::Cancelled => "Resume the run with --resume",
        }
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt that just failed (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Category of the failed attempt
    pub kind: FailureKind,
    /// HTTP status, if any
    pub status: Option<u16>,
    /// Wait before the next attempt
    pub backoff: Duration,
    /// What was being fetched (e.g. "ral-companies page 3")
    pub label: String,
    /// Error text or body excerpt
    pub error_message: String,
}

impl RetryContext {
    /// Build a context for the attempt that just failed
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        kind: FailureKind,
        status: Option<u16>,
        backoff: Duration,
        label: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            kind,
            status,
            backoff,
            label: label.into(),
            error_message: error_message.into(),
        }
    }

    /// Standard retry line with attempt counters
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying {} (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.label,
            self.attempt + 1,
            self.max_attempts,
            self.kind.description(self.status),
            self.backoff.as_secs_f64()
        )
    }

    /// Line logged when a retried request finally succeeds
    pub fn format_success(&self) -> String {
        format!(
            "Retry attempt {}/{} for {} succeeded",
            self.attempt, self.max_attempts, self.label
        )
    }

    /// Multi-line failure summary with a remediation hint
    pub fn format_failure(&self) -> String {
        let mut lines = vec![format!(
            "[FAILED] {} failed after {} attempt(s): {}",
            self.label,
            self.attempt,
            self.kind.description(self.status)
        )];
        if let Some(status) = self.status {
            lines.push(format!("  Status: {status}"));
        }
        if !self.error_message.is_empty() {
            lines.push(format!("  Last error: {}", self.error_message));
        }
        lines.push(format!("  Suggestion: {}", self.kind.suggestion()));
        lines.join("\n")
    }
}
