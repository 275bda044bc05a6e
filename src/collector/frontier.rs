//! Issue window
//!
//! Decides which ordinal (page index or id) to request next and when a sweep
//! is finished. Ordinals are issued in ascending order and may complete in
//! any order; the watermark is the lowest ordinal not yet completed.

use crate::registry::StrategyConfig;
use crate::resume::CollectionState;
use std::collections::BTreeSet;

/// How one ordinal ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Produced at least one item
    Present,
    /// Empty page, empty body or 404
    Absent,
    /// Failed permanently
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    /// Paged sweep of a known size; `end` is exclusive
    Bounded { end: u64 },
    /// Paged sweep whose size is unknown: one page at a time until a
    /// response says how many there are
    Probing,
    /// Sweep ends after `empty_threshold` absent ordinals past the highest
    /// present one
    Unbounded,
}

/// Issue window for one run
#[derive(Debug, Clone)]
pub struct Frontier {
    window: Window,
    origin: u64,
    page_size: Option<u32>,
    end_cap: Option<u64>,
    empty_threshold: u64,
    watermark: u64,
    next: u64,
    in_flight: BTreeSet<u64>,
    done_above: BTreeSet<u64>,
    highest_present: Option<u64>,
    failed: BTreeSet<u64>,
}

impl Frontier {
    /// Window continuing from `state`
    pub fn new(strategy: &StrategyConfig, state: &CollectionState, empty_threshold: u64) -> Self {
        let start = state.cursor().position().max(strategy.origin());
        let (window, page_size, end_cap) = match strategy {
            StrategyConfig::Paged { page_size, .. } => {
                let window = match state.total_target() {
                    Some(total) => Window::Bounded {
                        end: bounded_end(strategy.origin(), total, *page_size),
                    },
                    None => Window::Probing,
                };
                (window, Some(*page_size), None)
            }
            StrategyConfig::IdSweep { end_id, .. } => {
                (Window::Unbounded, None, end_id.map(|end| end.saturating_add(1)))
            }
        };

        Self {
            window,
            origin: strategy.origin(),
            page_size,
            end_cap,
            empty_threshold: empty_threshold.max(1),
            watermark: start,
            next: start,
            in_flight: BTreeSet::new(),
            done_above: BTreeSet::new(),
            highest_present: state.highest_present(),
            failed: state.failed().clone(),
        }
    }

    /// Next ordinal to request, if the window allows one now
    pub fn next_ordinal(&mut self) -> Option<u64> {
        let allowed = match self.window {
            Window::Probing => self.in_flight.is_empty(),
            _ => self.limit().is_some_and(|limit| self.next < limit),
        };
        if !allowed {
            return None;
        }
        let ordinal = self.next;
        self.next += 1;
        self.in_flight.insert(ordinal);
        Some(ordinal)
    }

    /// A response reported the collection size.
    ///
    /// Ignored for ID-sweeps, where item counts say nothing about id range.
    pub fn observe_total(&mut self, total: u64) {
        if let Some(page_size) = self.page_size {
            self.window = Window::Bounded {
                end: bounded_end(self.origin, total, page_size),
            };
        }
    }

    /// Record the end of an issued ordinal
    pub fn complete(&mut self, ordinal: u64, completion: Completion) {
        self.in_flight.remove(&ordinal);

        match completion {
            Completion::Present => {
                self.highest_present = Some(self.highest_present.map_or(ordinal, |h| h.max(ordinal)));
                self.failed.remove(&ordinal);
            }
            Completion::Absent => {
                self.failed.remove(&ordinal);
            }
            Completion::Failed => {
                self.failed.insert(ordinal);
            }
        }

        if self.window == Window::Probing {
            self.window = Window::Unbounded;
        }

        if ordinal >= self.watermark {
            self.done_above.insert(ordinal);
        }
        while self.done_above.remove(&self.watermark) {
            self.watermark += 1;
        }
    }

    /// Exclusive upper bound on ordinals issued so far in this window.
    ///
    /// `None` while probing for the collection size.
    pub fn limit(&self) -> Option<u64> {
        let limit = match self.window {
            Window::Bounded { end } => end,
            Window::Probing => return None,
            Window::Unbounded => {
                let base = self
                    .highest_present
                    .map_or(self.origin, |h| h.saturating_add(1))
                    .max(self.origin);
                let extension = self.failed.range(base..).count() as u64;
                base.saturating_add(self.empty_threshold)
                    .saturating_add(extension)
            }
        };
        Some(match self.end_cap {
            Some(cap) => limit.min(cap),
            None => limit,
        })
    }

    /// Lowest ordinal not yet completed; where a resumed run starts
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Ordinals currently in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether the window has a known end
    pub fn is_bounded(&self) -> bool {
        matches!(self.window, Window::Bounded { .. })
    }

    /// Nothing in flight and nothing left to issue
    pub fn is_exhausted(&self) -> bool {
        self.in_flight.is_empty() && self.limit().is_some_and(|limit| self.next >= limit)
    }
}

fn bounded_end(origin: u64, total: u64, page_size: u32) -> u64 {
    origin.saturating_add(total.div_ceil(u64::from(page_size.max(1))))
}
