//! # Mailbox Item Index
//!
//! Decrypted mailbox items keyed by uid, backed by the durable
//! [`MailboxMessageList`].
//!
//! A uid maps to a list because redundant deliveries under one uid may
//! coexist until the application removes them.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use shared_types::{PayloadHash, Timestamp};

use super::entities::{DecryptedMessageWithPubKey, MailboxItem};

/// Durable, ordered list of received mailbox items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxMessageList {
    /// Items in arrival order.
    pub items: Vec<MailboxItem>,
}

/// In-memory index over the received items.
#[derive(Debug, Default)]
pub struct MailboxItemIndex {
    by_uid: HashMap<String, Vec<MailboxItem>>,
    list: Vec<MailboxItem>,
    payload_hashes: HashSet<PayloadHash>,
}

impl MailboxItemIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted list, skipping entries older than `ttl_millis`.
    ///
    /// Returns the index and the number of expired items dropped.
    pub fn from_persisted(list: MailboxMessageList, now: Timestamp, ttl_millis: u64) -> (Self, usize) {
        let mut index = Self::new();
        let mut expired = 0;
        for item in list.items {
            if item.protected_mailbox_storage_entry.is_expired(now, ttl_millis) {
                expired += 1;
                continue;
            }
            index.insert(item);
        }
        (index, expired)
    }

    /// Add an item. Returns `false` if its payload is already indexed.
    pub fn insert(&mut self, item: MailboxItem) -> bool {
        if !self.payload_hashes.insert(item.payload_hash()) {
            return false;
        }
        self.by_uid
            .entry(item.uid().to_string())
            .or_default()
            .push(item.clone());
        self.list.push(item);
        true
    }

    /// Drop every item under `uid` and return them.
    pub fn remove_uid(&mut self, uid: &str) -> Vec<MailboxItem> {
        let Some(items) = self.by_uid.remove(uid) else {
            return Vec::new();
        };
        for item in &items {
            self.payload_hashes.remove(&item.payload_hash());
        }
        self.list.retain(|item| item.uid() != uid);
        items
    }

    /// True if this payload was already indexed.
    pub fn contains_payload(&self, hash: &PayloadHash) -> bool {
        self.payload_hashes.contains(hash)
    }

    /// First recorded message per uid, in arrival order.
    ///
    /// Later deliveries under the same uid are assumed interchangeable. If two
    /// senders ever reuse a uid, only the first one is visible here.
    pub fn first_messages(&self) -> Vec<DecryptedMessageWithPubKey> {
        let mut seen = HashSet::new();
        self.list
            .iter()
            .filter(|item| seen.insert(item.uid()))
            .map(|item| item.decrypted_message_with_pub_key.clone())
            .collect()
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Snapshot for persistence.
    pub fn to_list(&self) -> MailboxMessageList {
        MailboxMessageList {
            items: self.list.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{
        MailboxMessage, MailboxStoragePayload, NetworkEnvelope, PrefixedSealedAndSignedMessage,
        ProtectedMailboxStorageEntry,
    };
    use crate::domain::value_objects::MAILBOX_TTL_MILLIS;
    use shared_crypto::{seal_and_sign, KeyRing};
    use shared_types::NodeAddress;

    fn item(uid: &str, body: &[u8], created: u64) -> MailboxItem {
        let alice = KeyRing::from_seeds([1; 32], [2; 32]);
        let bob = KeyRing::from_seeds([3; 32], [4; 32]);
        let sender = NodeAddress::new("alice.onion", 9999);
        let payload = MailboxStoragePayload {
            prefixed_sealed_and_signed_message: PrefixedSealedAndSignedMessage {
                sender_node_address: sender.clone(),
                sealed_and_signed: seal_and_sign(&alice, bob.pub_key_ring(), body).unwrap(),
                address_prefix_hash: vec![],
                uid: uid.to_string(),
            },
            sender_pub_key_for_add_operation: alice.pub_key_ring().signature_pub_key,
            owner_pub_key: bob.pub_key_ring().signature_pub_key,
            ttl_millis: MAILBOX_TTL_MILLIS,
        };
        let hash = payload.hash();
        let entry = ProtectedMailboxStorageEntry {
            receivers_pub_key: payload.owner_pub_key,
            payload,
            owner_pub_key: alice.pub_key_ring().signature_pub_key,
            sequence_number: 1,
            signature: alice.sign(&ProtectedMailboxStorageEntry::signing_bytes(&hash, 1)),
            creation_time_stamp: Timestamp::from_millis(created),
        };
        let decrypted = DecryptedMessageWithPubKey {
            network_envelope: NetworkEnvelope::Mailbox(MailboxMessage::new(
                uid,
                sender,
                "Ack",
                body.to_vec(),
            )),
            signature_pub_key: alice.pub_key_ring().signature_pub_key,
        };
        MailboxItem::new(entry, decrypted).unwrap()
    }

    fn count_uid(index: &MailboxItemIndex, uid: &str) -> usize {
        index.to_list().items.iter().filter(|i| i.uid() == uid).count()
    }

    #[test]
    fn test_duplicate_uid_keeps_both_items_first_wins() {
        let mut index = MailboxItemIndex::new();
        assert!(index.insert(item("m1", b"first", 0)));
        assert!(index.insert(item("m1", b"second", 0)));

        assert_eq!(index.len(), 2);
        assert_eq!(count_uid(&index, "m1"), 2);

        let messages = index.first_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].mailbox_message().unwrap().body, b"first");
    }

    #[test]
    fn test_same_payload_is_not_indexed_twice() {
        let mut index = MailboxItemIndex::new();
        let a = item("m1", b"x", 0);
        assert!(index.insert(a.clone()));
        assert!(!index.insert(a.clone()));
        assert!(index.contains_payload(&a.payload_hash()));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remove_uid_clears_everything() {
        let mut index = MailboxItemIndex::new();
        index.insert(item("m1", b"a", 0));
        index.insert(item("m1", b"b", 0));
        index.insert(item("m2", b"c", 0));

        let removed = index.remove_uid("m1");
        assert_eq!(removed.len(), 2);
        assert_eq!(count_uid(&index, "m1"), 0);
        assert_eq!(index.to_list().items.len(), 1);
        assert!(removed.iter().all(|i| !index.contains_payload(&i.payload_hash())));

        assert!(index.remove_uid("m1").is_empty());
    }

    #[test]
    fn test_from_persisted_drops_expired() {
        let list = MailboxMessageList {
            items: vec![item("old", b"a", 0), item("new", b"b", MAILBOX_TTL_MILLIS)],
        };
        let now = Timestamp::from_millis(MAILBOX_TTL_MILLIS + 10);
        let (index, expired) = MailboxItemIndex::from_persisted(list, now, MAILBOX_TTL_MILLIS);

        assert_eq!(expired, 1);
        assert_eq!(count_uid(&index, "new"), 1);
        assert_eq!(count_uid(&index, "old"), 0);
    }
}
