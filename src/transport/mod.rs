//! Rate-limited HTTP transport
//!
//! The transport issues exactly one HTTP exchange per call. It enforces the
//! global ceiling on in-flight requests, a per-request timeout and optional
//! window pacing, and passes the raw response through uninterpreted. Retries
//! and status classification live in [`crate::retry`].

pub mod http;
pub mod rate_limit;

pub use http::ReqwestTransport;
pub use rate_limit::{RateLimitError, RateLimiter};

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;

/// HTTP method supported by targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    #[default]
    Get,
    /// POST with a JSON body
    Post,
}

/// A fully-built outbound request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL without query string
    pub url: String,
    /// Query parameters in send order
    pub query: Vec<(String, String)>,
    /// Header name/value pairs, including authorization
    pub headers: Vec<(String, String)>,
    /// Optional JSON body for POST targets
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    /// GET request with no parameters
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Append a query parameter
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Append a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Short description used in logs (`GET https://host/path`)
    pub fn describe(&self) -> String {
        let method = match self.method {
            Method::Get => "GET",
            Method::Post => "POST",
        };
        format!("{method} {}", self.url)
    }
}

/// Response passed through from the remote without interpretation
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers, names lower-cased
    pub headers: BTreeMap<String, String>,
    /// Raw body bytes
    pub body: Bytes,
}

impl RawResponse {
    /// Build a response from parts
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Attach a header (name is lower-cased)
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Look up a header case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// First `max` characters of the body for diagnostics
    pub fn body_excerpt(&self, max: usize) -> String {
        let text = String::from_utf8_lossy(&self.body);
        if text.chars().count() <= max {
            text.into_owned()
        } else {
            let mut excerpt: String = text.chars().take(max).collect();
            excerpt.push('…');
            excerpt
        }
    }
}

/// Transport-level failures (no HTTP status was received)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request did not complete within the configured timeout
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Connection refused, reset, or DNS failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Any other failure while sending or reading the body
    #[error("transport error: {0}")]
    Other(String),
}

/// One HTTP exchange per call
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return the raw response
    async fn send(&self, request: HttpRequest) -> Result<RawResponse, TransportError>;
}
