//! Observability metrics for collection runs
//!
//! Uses the `metrics` facade so recording is a no-op until an exporter is
//! installed. [`init_metrics`] installs a Prometheus scrape endpoint.

use crate::retry::FailureKind;
use crate::transport::TransportError;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Metrics initialization errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The Prometheus exporter could not be installed
    #[error("failed to install Prometheus exporter on {addr}: {message}")]
    InstallFailed {
        /// Requested listen address
        addr: SocketAddr,
        /// Underlying error
        message: String,
    },
}

/// Install the Prometheus exporter. Idempotent.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| {
            METRICS_INITIALIZED.store(false, Ordering::SeqCst);
            MetricsError::InstallFailed {
                addr,
                message: e.to_string(),
            }
        })?;

    describe_counter!(
        "harvest_requests_total",
        Unit::Count,
        "HTTP exchanges by status class"
    );
    describe_histogram!(
        "harvest_request_duration_seconds",
        Unit::Seconds,
        "HTTP exchange duration"
    );
    describe_counter!(
        "harvest_retries_total",
        Unit::Count,
        "Retry attempts by failure category"
    );
    describe_histogram!(
        "harvest_backoff_seconds",
        Unit::Seconds,
        "Backoff applied before a retry"
    );
    describe_counter!(
        "harvest_failures_total",
        Unit::Count,
        "Page requests that failed permanently, by category"
    );
    describe_counter!(
        "harvest_items_total",
        Unit::Count,
        "Items seen by the accumulator, by outcome"
    );
    describe_gauge!(
        "harvest_collected_items",
        Unit::Count,
        "Distinct items in the collection state"
    );

    info!("Metrics endpoint listening on {}", addr);
    Ok(())
}

/// Whether an exporter has been installed
pub fn is_initialized() -> bool {
    METRICS_INITIALIZED.load(Ordering::SeqCst)
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let n = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{n:08x}")
}

/// Timing and outcome of one HTTP exchange
#[derive(Debug)]
pub struct HttpRequestMetrics {
    host: String,
    start_time: Instant,
    correlation_id: String,
}

impl HttpRequestMetrics {
    /// Start timing a request to `url`
    pub fn start(url: &str) -> Self {
        Self {
            host: host_of(url).to_string(),
            start_time: Instant::now(),
            correlation_id: generate_correlation_id(),
        }
    }

    /// Correlation ID assigned to this exchange
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Record a completed exchange
    pub fn record_complete(&self, status: u16) {
        let class = format!("{}xx", status / 100);
        counter!("harvest_requests_total", "host" => self.host.clone(), "status" => class)
            .increment(1);
        histogram!("harvest_request_duration_seconds", "host" => self.host.clone())
            .record(self.start_time.elapsed().as_secs_f64());

        if status == 429 {
            warn!(
                correlation_id = %self.correlation_id,
                host = %self.host,
                "Rate limit response received"
            );
        }
    }

    /// Record an exchange that produced no HTTP status
    pub fn record_transport_error(&self, error: &TransportError) {
        let label = match error {
            TransportError::Timeout(_) => "timeout",
            TransportError::Connection(_) => "connection",
            TransportError::Other(_) => "other",
        };
        counter!("harvest_requests_total", "host" => self.host.clone(), "status" => label)
            .increment(1);
        histogram!("harvest_request_duration_seconds", "host" => self.host.clone())
            .record(self.start_time.elapsed().as_secs_f64());
    }
}

/// Record a retry and the backoff chosen for it
pub fn record_retry(kind: FailureKind, backoff: Duration) {
    counter!("harvest_retries_total", "kind" => kind.as_str()).increment(1);
    histogram!("harvest_backoff_seconds").record(backoff.as_secs_f64());
}

/// Record a permanently failed page request
pub fn record_failure(kind: FailureKind) {
    counter!("harvest_failures_total", "kind" => kind.as_str()).increment(1);
}

/// Record accumulator outcomes for one absorbed page
pub fn record_absorb(added: u64, updated: u64, skipped: u64) {
    counter!("harvest_items_total", "outcome" => "added").increment(added);
    counter!("harvest_items_total", "outcome" => "updated").increment(updated);
    counter!("harvest_items_total", "outcome" => "skipped").increment(skipped);
}

/// Publish the current collection size
pub fn set_collected(count: usize) {
    gauge!("harvest_collected_items").set(count as f64);
}

fn host_of(url: &str) -> &str {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    without_scheme
        .split(['/', '?'])
        .next()
        .unwrap_or(without_scheme)
}
