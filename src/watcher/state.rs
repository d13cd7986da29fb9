//! Which nonces still need settling

use crate::common::types::Nonce;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle of one order watcher
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatcherPhase {
    Recovering,
    Live,
    Stopped,
}

/// Unprocessed nonces plus the highest processed one.
///
/// Built once from chain history at boot and maintained incrementally as
/// orders settle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NonceTracker {
    unprocessed: BTreeSet<Nonce>,
    latest_processed: Option<Nonce>,
}

impl NonceTracker {
    pub fn from_history(
        ordered: impl IntoIterator<Item = Nonce>,
        processed: impl IntoIterator<Item = Nonce>,
    ) -> Self {
        let processed: BTreeSet<Nonce> = processed.into_iter().collect();
        let unprocessed = ordered
            .into_iter()
            .filter(|nonce| !processed.contains(nonce))
            .collect();

        Self {
            unprocessed,
            latest_processed: processed.iter().next_back().copied(),
        }
    }

    /// A nonce may be settled if it is known-unprocessed or newer than
    /// anything processed so far.
    pub fn is_admissible(&self, nonce: Nonce) -> bool {
        self.unprocessed.contains(&nonce)
            || self.latest_processed.map_or(true, |latest| nonce > latest)
    }

    pub fn mark_processed(&mut self, nonce: Nonce) {
        self.unprocessed.remove(&nonce);
        if self.latest_processed.map_or(true, |latest| nonce > latest) {
            self.latest_processed = Some(nonce);
        }
    }

    /// Record a nonce the chain shows as requested and not yet processed.
    pub fn note_unprocessed(&mut self, nonce: Nonce) {
        self.unprocessed.insert(nonce);
    }

    pub fn unprocessed(&self) -> &BTreeSet<Nonce> {
        &self.unprocessed
    }

    pub fn latest_processed(&self) -> Option<Nonce> {
        self.latest_processed
    }
}
