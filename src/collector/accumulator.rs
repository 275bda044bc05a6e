//! Deduplicating accumulator
//!
//! Absorption is keyed on [`ItemId`] and compares payloads by digest, so
//! re-fetching an overlapping page or rescanning an id range is harmless:
//! absorbing the same items twice changes nothing the second time.

use crate::resume::CollectionState;
use crate::{metrics, Item};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ops::AddAssign;

/// Outcome counts of one absorb call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AbsorbSummary {
    /// Ids seen for the first time
    pub added: u64,
    /// Known ids whose payload changed
    pub updated: u64,
    /// Known ids with an identical payload
    pub skipped: u64,
}

impl AbsorbSummary {
    /// Items that changed collection state
    pub fn accepted(&self) -> u64 {
        self.added + self.updated
    }
}

impl AddAssign for AbsorbSummary {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.updated += other.updated;
        self.skipped += other.skipped;
    }
}

/// SHA-256 of the payload's canonical JSON form (object keys sorted)
pub fn payload_digest(payload: &serde_json::Value) -> String {
    format!("{:x}", Sha256::digest(payload.to_string().as_bytes()))
}

/// Merges fetched items into a [`CollectionState`]
#[derive(Debug, Default)]
pub struct Accumulator {
    track_pending: bool,
    pending: Vec<Item>,
}

impl Accumulator {
    /// Accumulator that discards accepted items after recording them
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulator that queues accepted items for an export sink
    pub fn with_export() -> Self {
        Self {
            track_pending: true,
            pending: Vec::new(),
        }
    }

    /// Absorb items in arrival order
    pub fn absorb<I>(&mut self, state: &mut CollectionState, items: I) -> AbsorbSummary
    where
        I: IntoIterator<Item = Item>,
    {
        let mut summary = AbsorbSummary::default();

        for item in items {
            let digest = payload_digest(&item.payload);
            match state.digest_of(&item.id) {
                Some(known) if known == digest => {
                    summary.skipped += 1;
                    continue;
                }
                Some(_) => summary.updated += 1,
                None => summary.added += 1,
            }
            state.record(item.id.clone(), digest);
            if self.track_pending {
                self.pending.push(item);
            }
        }

        metrics::record_absorb(summary.added, summary.updated, summary.skipped);
        summary
    }

    /// Items accepted since the last export
    pub fn pending(&self) -> &[Item] {
        &self.pending
    }

    /// Forget pending items once they are exported
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }
}
