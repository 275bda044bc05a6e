//! # Registry Harvester Library
//!
//! A resilient bulk-collection engine for paginated HTTP registries. It sweeps a
//! remote collection either page by page or by probing sequential identifiers,
//! deduplicates what it finds, and checkpoints progress so an interrupted run
//! resumes where it stopped.
//!
//! ## Features
//!
//! - **Bounded concurrency**: a transport-wide ceiling on in-flight requests with
//!   optional per-window pacing
//! - **Adaptive retry**: exponential backoff with jitter, `Retry-After` aware 429
//!   handling, and immediate abort on authentication failures
//! - **Pluggable schemas**: JSON-pointer driven extraction of items and totals
//! - **Resume capability**: atomic checkpoints guarded by an advisory lock
//! - **Exports**: delimited text, JSON Lines, or link lists fed at checkpoint
//!   boundaries
//!
//! ## Quick Start
//!
//! ```no_run
//! use registry_harvester::collector::Orchestrator;
//! use registry_harvester::registry::TargetRegistry;
//! use registry_harvester::shutdown::ShutdownCoordinator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = TargetRegistry::load("harvester.toml")?;
//! let target = registry.get("ral-companies")?;
//!
//! let orchestrator = Orchestrator::from_target(target, ShutdownCoordinator::shared())?;
//! let report = orchestrator.run(false).await?;
//! println!("{}", report.stats.format_summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`transport`] - Rate-limited HTTP transport (concurrency ceiling, timeout, pacing)
//! - [`retry`] - Failure taxonomy and the shared retry/backoff policy
//! - [`fetcher`] - Page fetcher and response schemas
//! - [`collector`] - Accumulator, issue window, and the run orchestrator
//! - [`resume`] - Checkpoint store with atomic writes and file locking
//! - [`output`] - Export sinks
//! - [`registry`] - Target definitions loaded from TOML

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// CLI command implementations
pub mod cli;

/// Collection orchestration
pub mod collector;

/// Bearer token sources
pub mod credentials;

/// Page fetching and response interpretation
pub mod fetcher;

/// Observability metrics
pub mod metrics;

/// Export sinks
pub mod output;

/// Target registry loaded from configuration
pub mod registry;

/// Checkpoint persistence
pub mod resume;

/// Failure classification and retry policy
pub mod retry;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// HTTP transport
pub mod transport;

/// Stable identifier of a collected record.
///
/// Remote registries use either integer or string keys; both are normalised to
/// their string form so `42` and `"42"` name the same item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Create an identifier from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build an identifier from a JSON scalar.
    ///
    /// Returns `None` for null, booleans, arrays, objects and empty strings.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(Self(s.trim().to_string())),
            serde_json::Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// Borrow the identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ItemId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A single record retrieved from the remote collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Stable identifier, unique within a collection
    pub id: ItemId,
    /// Opaque record body
    pub payload: serde_json::Value,
    /// When the record was fetched
    pub fetched_at: DateTime<Utc>,
}

impl Item {
    /// Create an item stamped with the current time
    pub fn new(id: ItemId, payload: serde_json::Value) -> Self {
        Self {
            id,
            payload,
            fetched_at: Utc::now(),
        }
    }
}

/// Position of a request within a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PageKey {
    /// Zero-based page index for server-side pagination
    Page(u64),
    /// Record identifier for ID-sweep probing
    Id(u64),
}

impl PageKey {
    /// Numeric position regardless of strategy
    pub fn ordinal(&self) -> u64 {
        match self {
            PageKey::Page(n) | PageKey::Id(n) => *n,
        }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageKey::Page(n) => write!(f, "page {n}"),
            PageKey::Id(n) => write!(f, "id {n}"),
        }
    }
}

/// A single logical fetch issued by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Page index or probed identifier
    pub key: PageKey,
    /// Page size for paginated strategies
    pub page_size: Option<u32>,
    /// Filter parameters passed through to the remote query
    pub filter: BTreeMap<String, String>,
}

impl PageRequest {
    /// Request a page of a paginated collection
    pub fn page(index: u64, page_size: u32) -> Self {
        Self {
            key: PageKey::Page(index),
            page_size: Some(page_size),
            filter: BTreeMap::new(),
        }
    }

    /// Probe a single identifier
    pub fn id(id: u64) -> Self {
        Self {
            key: PageKey::Id(id),
            page_size: None,
            filter: BTreeMap::new(),
        }
    }

    /// Attach filter parameters
    pub fn with_filter(mut self, filter: BTreeMap<String, String>) -> Self {
        self.filter = filter;
        self
    }
}
