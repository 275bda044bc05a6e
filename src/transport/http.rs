//! reqwest-backed transport with a global in-flight ceiling

use super::{HttpRequest, Method, RateLimiter, RawResponse, Transport, TransportError};
use crate::metrics::HttpRequestMetrics;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// HTTP connect timeout - time to establish the TCP/TLS connection
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Requests slower than this are logged at warn level
const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(5);

/// Transport sharing one connection pool and one slot semaphore across workers
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    slots: Arc<Semaphore>,
    concurrency: usize,
    timeout: Duration,
    limiter: Option<RateLimiter>,
}

impl ReqwestTransport {
    /// Create a transport allowing `concurrency` in-flight requests
    pub fn new(concurrency: usize, timeout: Duration) -> Result<Self, TransportError> {
        let concurrency = concurrency.max(1);
        let client = Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            slots: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            timeout,
            limiter: None,
        })
    }

    /// Pace request starts with a window limiter
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Configured in-flight ceiling
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Per-request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn exchange(&self, request: &HttpRequest) -> Result<RawResponse, reqwest::Error> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<RawResponse, TransportError> {
        let _slot = self
            .slots
            .acquire()
            .await
            .map_err(|e| TransportError::Other(format!("transport closed: {e}")))?;

        if let Some(limiter) = &self.limiter {
            limiter
                .acquire()
                .await
                .map_err(|e| TransportError::Other(e.to_string()))?;
        }

        let endpoint = request.describe();
        let metrics = HttpRequestMetrics::start(&request.url);
        let started = Instant::now();

        let result = match tokio::time::timeout(self.timeout, self.exchange(&request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(classify_reqwest_error(&e, self.timeout)),
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        };

        let elapsed = started.elapsed();
        if elapsed > SLOW_REQUEST_THRESHOLD {
            warn!(
                endpoint = %endpoint,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow request"
            );
        }

        match &result {
            Ok(response) => {
                metrics.record_complete(response.status);
                debug!(
                    endpoint = %endpoint,
                    status = response.status,
                    bytes = response.body.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Request completed"
                );
            }
            Err(e) => {
                metrics.record_transport_error(e);
                debug!(endpoint = %endpoint, error = %e, "Request failed without a response");
            }
        }

        result
    }
}

/// Map a reqwest failure onto the transport taxonomy.
fn classify_reqwest_error(err: &reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() || err.is_request() || err.is_body() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
