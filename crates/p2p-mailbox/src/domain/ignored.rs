//! # Ignored-Mailbox Ledger
//!
//! Uids of mailbox entries that failed to decrypt with our keys. Gossip
//! delivers most entries to most nodes, so remembering them avoids redoing
//! the asymmetric decryption for every copy.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shared_types::Timestamp;

/// Durable map of ignored uid to entry creation time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoredMailboxMap {
    data: BTreeMap<String, Timestamp>,
}

impl IgnoredMailboxMap {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if decryption of `uid` already failed.
    pub fn is_ignored(&self, uid: &str) -> bool {
        self.data.contains_key(uid)
    }

    /// Record a failed decryption. Returns `false` if already recorded, in
    /// which case the first creation time is kept.
    pub fn ignore(&mut self, uid: impl Into<String>, creation_time_stamp: Timestamp) -> bool {
        match self.data.entry(uid.into()) {
            Entry::Vacant(slot) => {
                slot.insert(creation_time_stamp);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Drop uids whose entries have outlived `ttl_millis`. Returns how many.
    pub fn prune_expired(&mut self, now: Timestamp, ttl_millis: u64) -> usize {
        let before = self.data.len();
        self.data
            .retain(|_, created| now.millis_since(*created) <= ttl_millis);
        before - self.data.len()
    }

    /// Number of ignored uids.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
