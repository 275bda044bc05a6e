//! Failure taxonomy and the shared retry/backoff policy
//!
//! Every outcome of a single HTTP attempt is classified into exactly one
//! [`Classification`]. Transient categories are retried by [`RetryPolicy`];
//! terminal ones surface immediately as a [`FetchFailure`].

pub mod formatter;
pub mod policy;

pub use formatter::RetryContext;
pub use policy::{parse_retry_after, RetryOutcome, RetryPolicy, MAX_RETRY_AFTER};

use crate::transport::{RawResponse, TransportError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest body excerpt carried in a failure
pub const BODY_EXCERPT_LEN: usize = 200;

/// Failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No response within the per-request timeout
    Timeout,
    /// 5xx, or the connection was refused or reset
    RetryableServer,
    /// 429 Too Many Requests
    RateLimited,
    /// 401/403; the whole run must stop
    TerminalAuth,
    /// 404; the requested page or id does not exist
    TerminalNotFound,
    /// Any other 4xx
    TerminalOther,
    /// The body did not match the configured response schema
    SchemaMismatch,
    /// Anything that fits no other category
    UnknownError,
    /// Abandoned because shutdown was requested
    Cancelled,
}

impl FailureKind {
    /// Every category that can appear in a run summary
    pub const REPORTED: [FailureKind; 8] = [
        FailureKind::Timeout,
        FailureKind::RetryableServer,
        FailureKind::RateLimited,
        FailureKind::TerminalAuth,
        FailureKind::TerminalNotFound,
        FailureKind::TerminalOther,
        FailureKind::SchemaMismatch,
        FailureKind::UnknownError,
    ];

    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RetryableServer => "retryable_server",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::TerminalAuth => "terminal_auth",
            FailureKind::TerminalNotFound => "terminal_not_found",
            FailureKind::TerminalOther => "terminal_other",
            FailureKind::SchemaMismatch => "schema_mismatch",
            FailureKind::UnknownError => "unknown_error",
            FailureKind::Cancelled => "cancelled",
        }
    }

    /// Whether the policy retries this category
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::Timeout | FailureKind::RetryableServer | FailureKind::RateLimited
        )
    }

    /// Authentication failures abort the run
    pub fn is_auth(&self) -> bool {
        matches!(self, FailureKind::TerminalAuth)
    }

    /// Whether this category counts against the failure-rate threshold.
    ///
    /// Not-found is absence rather than failure, and cancellation is the
    /// operator's choice.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, FailureKind::TerminalNotFound | FailureKind::Cancelled)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// 2xx
    Success,
    /// Anything else
    Failure(FailureKind),
}

/// Classify an HTTP status code
pub fn classify_status(status: u16) -> Classification {
    match status {
        200..=299 => Classification::Success,
        401 | 403 => Classification::Failure(FailureKind::TerminalAuth),
        404 => Classification::Failure(FailureKind::TerminalNotFound),
        429 => Classification::Failure(FailureKind::RateLimited),
        400..=499 => Classification::Failure(FailureKind::TerminalOther),
        500..=599 => Classification::Failure(FailureKind::RetryableServer),
        _ => Classification::Failure(FailureKind::UnknownError),
    }
}

/// Classify the outcome of one transport call
pub fn classify(outcome: &Result<RawResponse, TransportError>) -> Classification {
    match outcome {
        Ok(response) => classify_status(response.status),
        Err(TransportError::Timeout(_)) => Classification::Failure(FailureKind::Timeout),
        Err(TransportError::Connection(_)) => Classification::Failure(FailureKind::RetryableServer),
        Err(TransportError::Other(_)) => Classification::Failure(FailureKind::UnknownError),
    }
}

/// A page request that did not produce a usable response
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} after {attempts} attempt(s): {message}")]
pub struct FetchFailure {
    /// Category of the final attempt
    pub kind: FailureKind,
    /// Attempts made, including the first
    pub attempts: u32,
    /// HTTP status of the final attempt, if one was received
    pub status: Option<u16>,
    /// Transport error text or truncated body
    pub message: String,
    /// Retries were exhausted on a transient category
    pub exhausted: bool,
    /// Categories of the attempts that were retried
    pub retried: Vec<FailureKind>,
}

impl FetchFailure {
    /// Failure with no status
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            attempts: 0,
            status: None,
            message: message.into(),
            exhausted: false,
            retried: Vec::new(),
        }
    }

    /// Failure built from a classified attempt
    pub fn from_outcome(
        kind: FailureKind,
        attempts: u32,
        outcome: &Result<RawResponse, TransportError>,
    ) -> Self {
        let (status, message) = match outcome {
            Ok(response) => (Some(response.status), response.body_excerpt(BODY_EXCERPT_LEN)),
            Err(e) => (None, e.to_string()),
        };
        Self {
            kind,
            attempts,
            status,
            message,
            exhausted: false,
            retried: Vec::new(),
        }
    }

    /// Shutdown interrupted the request
    pub fn cancelled(attempts: u32) -> Self {
        Self {
            attempts,
            ..Self::new(FailureKind::Cancelled, "shutdown requested")
        }
    }

    /// Schema mismatch on an otherwise successful response
    pub fn schema_mismatch(attempts: u32, status: u16, message: impl Into<String>) -> Self {
        Self {
            attempts,
            status: Some(status),
            ..Self::new(FailureKind::SchemaMismatch, message)
        }
    }
}
