//! Exponential backoff with bounded jitter and server rate-limit hints

use super::{classify, Classification, FailureKind, FetchFailure, RetryContext};
use crate::collector::config::{DEFAULT_BASE_DELAY, DEFAULT_JITTER_FRACTION, DEFAULT_MAX_DELAY};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::{RawResponse, TransportError};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// A successful response and how much it cost
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    /// The 2xx response
    pub response: RawResponse,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Categories of the attempts that were retried
    pub retried: Vec<FailureKind>,
}

/// Retry policy shared by every call site of a run
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::collector::config::DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY)
    }
}

impl RetryPolicy {
    /// Policy making at most `max_attempts` attempts in total
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: DEFAULT_MAX_DELAY.max(base_delay),
            jitter_fraction: DEFAULT_JITTER_FRACTION,
        }
    }

    /// Cap computed backoff (server hints are not capped)
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay.max(self.base_delay);
        self
    }

    /// Jitter as a fraction of the base delay, clamped to `0.0..=1.0`
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Total attempts allowed
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base delay
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Upper bound for the random jitter offset
    pub fn max_jitter(&self) -> Duration {
        self.base_delay.mul_f64(self.jitter_fraction)
    }

    /// Backoff before retrying after failed attempt `attempt` (0-based).
    ///
    /// `min(base * 2^attempt + jitter, max_delay)`. With `jitter <= base` the
    /// sequence is non-decreasing in `attempt`.
    pub fn backoff_for(&self, attempt: u32, jitter: Duration) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .saturating_mul(factor)
            .saturating_add(jitter.min(self.max_jitter()))
            .min(self.max_delay)
    }

    /// Backoff with a freshly sampled jitter, honouring a 429 hint.
    pub fn delay_for(&self, attempt: u32, kind: FailureKind, hint: Option<Duration>) -> Duration {
        let computed = self.backoff_for(attempt, self.sample_jitter());
        match (kind, hint) {
            (FailureKind::RateLimited, Some(hint)) => hint.max(computed),
            _ => computed,
        }
    }

    fn sample_jitter(&self) -> Duration {
        let max = self.max_jitter();
        if max.is_zero() {
            return Duration::ZERO;
        }
        let nanos = max.as_nanos().min(u64::MAX as u128) as u64;
        Duration::from_nanos(rand::rng().random_range(0..=nanos))
    }

    /// Run one logical request through the policy.
    ///
    /// `make_request` receives the 0-based attempt number and performs a single
    /// transport call. Transient categories are retried until `max_attempts`;
    /// terminal categories return at once. Backoff sleeps end early when
    /// `shutdown` fires, returning a [`FailureKind::Cancelled`] failure.
    pub async fn execute<F, Fut>(
        &self,
        label: &str,
        shutdown: Option<&ShutdownCoordinator>,
        mut make_request: F,
    ) -> Result<RetryOutcome, FetchFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<RawResponse, TransportError>>,
    {
        let mut retried = Vec::new();
        let mut attempt = 0u32;

        loop {
            if shutdown.is_some_and(|s| s.is_shutdown_requested()) {
                return Err(FetchFailure {
                    retried,
                    ..FetchFailure::cancelled(attempt)
                });
            }

            let outcome = make_request(attempt).await;
            let attempts_made = attempt + 1;

            let kind = match classify(&outcome) {
                Classification::Success => {
                    let response = match outcome {
                        Ok(response) => response,
                        Err(e) => return Err(FetchFailure::new(FailureKind::UnknownError, e.to_string())),
                    };
                    if attempt > 0 {
                        let context = RetryContext::new(
                            attempts_made,
                            self.max_attempts,
                            retried.last().copied().unwrap_or(FailureKind::UnknownError),
                            Some(response.status),
                            Duration::ZERO,
                            label,
                            "",
                        );
                        info!("{}", context.format_success());
                    }
                    return Ok(RetryOutcome {
                        response,
                        attempts: attempts_made,
                        retried,
                    });
                }
                Classification::Failure(kind) => kind,
            };

            let mut failure = FetchFailure::from_outcome(kind, attempts_made, &outcome);

            if !kind.is_retryable() {
                failure.retried = retried;
                return Err(failure);
            }

            if attempts_made >= self.max_attempts {
                let context = RetryContext::new(
                    attempts_made,
                    self.max_attempts,
                    kind,
                    failure.status,
                    Duration::ZERO,
                    label,
                    failure.message.clone(),
                );
                error!("{}", context.format_failure());
                failure.exhausted = true;
                failure.retried = retried;
                return Err(failure);
            }

            let hint = outcome
                .as_ref()
                .ok()
                .and_then(|response| response.header("retry-after"))
                .and_then(parse_retry_after);
            let delay = self.delay_for(attempt, kind, hint);

            let context = RetryContext::new(
                attempt,
                self.max_attempts,
                kind,
                failure.status,
                delay,
                label,
                failure.message.clone(),
            );
            warn!(
                kind = %kind,
                status = ?failure.status,
                attempt = attempts_made,
                max_attempts = self.max_attempts,
                backoff_ms = delay.as_millis() as u64,
                hinted = hint.is_some(),
                "{}",
                context.format_retry()
            );
            metrics::record_retry(kind, delay);
            retried.push(kind);

            match shutdown {
                Some(shutdown) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.wait_for_shutdown() => {
                            return Err(FetchFailure {
                                retried,
                                ..FetchFailure::cancelled(attempts_made)
                            });
                        }
                    }
                }
                None => tokio::time::sleep(delay).await,
            }

            attempt += 1;
        }
    }
}

/// Longest `Retry-After` hint honoured; larger hints are clamped to it
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Parse a `Retry-After` value given as delta-seconds or an HTTP-date.
///
/// Values a [`Duration`] cannot represent (negative, NaN, or beyond its range)
/// are ignored; representable values are clamped to [`MAX_RETRY_AFTER`].
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    let hint = if let Ok(secs) = value.parse::<u64>() {
        Duration::from_secs(secs)
    } else if let Ok(secs) = value.parse::<f64>() {
        Duration::try_from_secs_f64(secs).ok()?
    } else {
        let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
        (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    };
    Some(hint.min(MAX_RETRY_AFTER))
}
