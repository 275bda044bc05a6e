//! Sweep position persisted in a checkpoint

use crate::registry::StrategyConfig;
use crate::PageKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a resumed run continues.
///
/// The value is a low watermark: every ordinal below it has been fetched and
/// absorbed (or permanently failed). Ordinals above it may also be done; they
/// are fetched again on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cursor {
    /// Next page index to fetch
    Page {
        /// Page index
        next_page: u64,
    },
    /// Next identifier to probe
    Id {
        /// Identifier
        next_id: u64,
    },
}

impl Cursor {
    /// Cursor at the start of a sweep
    pub fn start(strategy: &StrategyConfig) -> Self {
        match strategy {
            StrategyConfig::Paged { first_page, .. } => Cursor::Page {
                next_page: *first_page,
            },
            StrategyConfig::IdSweep { start_id, .. } => Cursor::Id { next_id: *start_id },
        }
    }

    /// Numeric position regardless of strategy
    pub fn position(&self) -> u64 {
        match self {
            Cursor::Page { next_page } => *next_page,
            Cursor::Id { next_id } => *next_id,
        }
    }

    /// Same kind of cursor at another position
    pub fn at(&self, position: u64) -> Self {
        match self {
            Cursor::Page { .. } => Cursor::Page {
                next_page: position,
            },
            Cursor::Id { .. } => Cursor::Id { next_id: position },
        }
    }

    /// Request key for an ordinal of this sweep
    pub fn key_for(&self, ordinal: u64) -> PageKey {
        match self {
            Cursor::Page { .. } => PageKey::Page(ordinal),
            Cursor::Id { .. } => PageKey::Id(ordinal),
        }
    }

    /// Whether this cursor belongs to `strategy`
    pub fn matches(&self, strategy: &StrategyConfig) -> bool {
        matches!(
            (self, strategy),
            (Cursor::Page { .. }, StrategyConfig::Paged { .. })
                | (Cursor::Id { .. }, StrategyConfig::IdSweep { .. })
        )
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Page { next_page } => write!(f, "next page {next_page}"),
            Cursor::Id { next_id } => write!(f, "next id {next_id}"),
        }
    }
}
