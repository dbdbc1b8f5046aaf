//! In-Memory Replicated Data Store
//!
//! Implements `P2PDataStorage` for a set of nodes sharing one process.
//! Every node holds the same `Arc<InMemoryDataStore>`, which stands in for
//! the fully replicated overlay: an add by one node is immediately visible
//! to all, and every subscriber receives the change event.
//!
//! Anti-replay follows the overlay rules: entries are signed over
//! `(payload hash, sequence number)`, sequence numbers only grow, and the
//! highest sequence number seen is kept after removal so an old entry cannot
//! be re-added.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_crypto::{CryptoError, Ed25519PublicKey, KeyRing};
use shared_types::{NodeAddress, PayloadHash};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::domain::{
    BroadcastResult, GenericStorageEntry, MailboxStoragePayload, OverlayError,
    ProtectedMailboxStorageEntry, ProtectedStorageEntry, StorageChange,
};
use crate::ports::{P2PDataStorage, TimeSource};

/// Capacity of the change-event channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct StoreState {
    map: BTreeMap<PayloadHash, ProtectedStorageEntry>,
    sequence_numbers: HashMap<PayloadHash, u32>,
}

/// Process-local overlay shared by several nodes.
pub struct InMemoryDataStore {
    state: RwLock<StoreState>,
    changes: broadcast::Sender<StorageChange>,
    broadcast_result: RwLock<BroadcastResult>,
    time_source: Arc<dyn TimeSource>,
}

impl InMemoryDataStore {
    /// Create an empty store.
    pub fn new(time_source: Arc<dyn TimeSource>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(StoreState::default()),
            changes,
            broadcast_result: RwLock::new(BroadcastResult::Sufficient { completed: 1 }),
            time_source,
        }
    }

    /// Set the acknowledgement reported for subsequent adds.
    pub fn set_broadcast_result(&self, result: BroadcastResult) {
        *self.broadcast_result.write() = result;
    }

    /// Store non-mailbox data.
    pub fn add_generic(&self, entry: GenericStorageEntry) {
        let stored = ProtectedStorageEntry::Generic(entry);
        self.state.write().map.insert(stored.hash(), stored.clone());
        self.publish(StorageChange {
            added: vec![stored],
            removed: vec![],
        });
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.state.read().map.len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.state.read().map.is_empty()
    }

    /// Mailbox entries whose cleartext uid is `uid`.
    pub fn mailbox_entries_with_uid(&self, uid: &str) -> Vec<ProtectedMailboxStorageEntry> {
        self.state
            .read()
            .map
            .values()
            .filter_map(|entry| match entry {
                ProtectedStorageEntry::Mailbox(e) if e.uid() == uid => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    fn publish(&self, change: StorageChange) {
        // No subscribers yet is fine.
        let _ = self.changes.send(change);
    }

    fn verify_entry(entry: &ProtectedMailboxStorageEntry) -> Result<PayloadHash, OverlayError> {
        let hash = entry.hash();
        let signed = ProtectedMailboxStorageEntry::signing_bytes(&hash, entry.sequence_number);
        entry
            .owner_pub_key
            .verify(&signed, &entry.signature)
            .map_err(|_| OverlayError::InvalidSignature)?;
        Ok(hash)
    }
}

#[async_trait]
impl P2PDataStorage for InMemoryDataStore {
    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }

    fn snapshot(&self) -> Vec<ProtectedStorageEntry> {
        self.state.read().map.values().cloned().collect()
    }

    fn contains(&self, hash: &PayloadHash) -> bool {
        self.state.read().map.contains_key(hash)
    }

    fn get_mailbox_data_with_signed_seq_nr(
        &self,
        payload: MailboxStoragePayload,
        key_ring: &KeyRing,
        receivers_pub_key: Ed25519PublicKey,
    ) -> Result<ProtectedMailboxStorageEntry, CryptoError> {
        let hash = payload.hash();
        let sequence_number = self
            .state
            .read()
            .sequence_numbers
            .get(&hash)
            .map_or(1, |seq| seq.saturating_add(1));
        let signature =
            key_ring.sign(&ProtectedMailboxStorageEntry::signing_bytes(&hash, sequence_number));

        Ok(ProtectedMailboxStorageEntry {
            payload,
            owner_pub_key: key_ring.pub_key_ring().signature_pub_key,
            sequence_number,
            signature,
            creation_time_stamp: self.time_source.now(),
            receivers_pub_key,
        })
    }

    async fn add_protected_storage_entry(
        &self,
        entry: ProtectedMailboxStorageEntry,
        sender: &NodeAddress,
    ) -> Result<BroadcastResult, OverlayError> {
        if entry.owner_pub_key != entry.payload.sender_pub_key_for_add_operation {
            warn!(%sender, "[mailbox-overlay] add not signed by payload sender");
            return Err(OverlayError::InvalidSignature);
        }
        let hash = Self::verify_entry(&entry)?;

        {
            let mut state = self.state.write();
            if let Some(&stored) = state.sequence_numbers.get(&hash) {
                if stored >= entry.sequence_number {
                    debug!(%sender, seq = entry.sequence_number, stored, "[mailbox-overlay] rejecting duplicate add");
                    return Err(OverlayError::DuplicateEntry);
                }
            }
            state.sequence_numbers.insert(hash, entry.sequence_number);
            state
                .map
                .insert(hash, ProtectedStorageEntry::Mailbox(entry.clone()));
        }

        info!(%sender, uid = entry.uid(), "[mailbox-overlay] stored mailbox entry");
        self.publish(StorageChange {
            added: vec![ProtectedStorageEntry::Mailbox(entry)],
            removed: vec![],
        });
        Ok(*self.broadcast_result.read())
    }

    fn remove(&self, entry: ProtectedMailboxStorageEntry, sender: &NodeAddress) -> bool {
        let hash = match Self::verify_entry(&entry) {
            Ok(hash) => hash,
            Err(_) => {
                warn!(%sender, "[mailbox-overlay] remove with invalid signature");
                return false;
            }
        };
        let payload = &entry.payload;
        if entry.owner_pub_key != payload.owner_pub_key
            && entry.owner_pub_key != payload.sender_pub_key_for_add_operation
        {
            warn!(%sender, "[mailbox-overlay] remove not signed by receiver or sender");
            return false;
        }

        let removed = {
            let mut state = self.state.write();
            let stored = state.sequence_numbers.get(&hash).copied().unwrap_or(0);
            if entry.sequence_number <= stored {
                debug!(%sender, seq = entry.sequence_number, stored, "[mailbox-overlay] stale remove");
                return false;
            }
            state.sequence_numbers.insert(hash, entry.sequence_number);
            state.map.remove(&hash)
        };

        match removed {
            Some(stored) => {
                info!(%sender, uid = entry.uid(), "[mailbox-overlay] removed mailbox entry");
                self.publish(StorageChange {
                    added: vec![],
                    removed: vec![stored],
                });
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PrefixedSealedAndSignedMessage;
    use crate::testing::FixedTimeSource;
    use shared_crypto::seal_and_sign;
    use shared_types::Timestamp;

    fn setup() -> (InMemoryDataStore, KeyRing, KeyRing, MailboxStoragePayload) {
        let store = InMemoryDataStore::new(Arc::new(FixedTimeSource::new(1_000)));
        let alice = KeyRing::generate();
        let bob = KeyRing::generate();
        let payload = MailboxStoragePayload {
            prefixed_sealed_and_signed_message: PrefixedSealedAndSignedMessage {
                sender_node_address: NodeAddress::new("alice.onion", 9999),
                sealed_and_signed: seal_and_sign(&alice, bob.pub_key_ring(), b"hi").unwrap(),
                address_prefix_hash: vec![],
                uid: "m1".to_string(),
            },
            sender_pub_key_for_add_operation: alice.pub_key_ring().signature_pub_key,
            owner_pub_key: bob.pub_key_ring().signature_pub_key,
            ttl_millis: 1_000,
        };
        (store, alice, bob, payload)
    }

    fn alice_addr() -> NodeAddress {
        NodeAddress::new("alice.onion", 9999)
    }

    #[tokio::test]
    async fn test_add_is_visible_and_broadcast() {
        let (store, alice, bob, payload) = setup();
        let mut rx = store.subscribe();
        let entry = store
            .get_mailbox_data_with_signed_seq_nr(payload.clone(), &alice, bob.pub_key_ring().signature_pub_key)
            .unwrap();
        assert_eq!(entry.sequence_number, 1);
        assert_eq!(entry.creation_time_stamp, Timestamp::from_millis(1_000));

        let result = store.add_protected_storage_entry(entry, &alice_addr()).await;
        assert_eq!(result, Ok(BroadcastResult::Sufficient { completed: 1 }));
        assert!(store.contains(&payload.hash()));
        assert_eq!(rx.recv().await.unwrap().added.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_add_rejected() {
        let (store, alice, bob, payload) = setup();
        let entry = store
            .get_mailbox_data_with_signed_seq_nr(payload, &alice, bob.pub_key_ring().signature_pub_key)
            .unwrap();
        store.add_protected_storage_entry(entry.clone(), &alice_addr()).await.unwrap();

        assert_eq!(
            store.add_protected_storage_entry(entry, &alice_addr()).await,
            Err(OverlayError::DuplicateEntry)
        );
    }

    #[tokio::test]
    async fn test_add_by_third_party_rejected() {
        let (store, _alice, bob, payload) = setup();
        let mallory = KeyRing::generate();
        let entry = store
            .get_mailbox_data_with_signed_seq_nr(payload, &mallory, bob.pub_key_ring().signature_pub_key)
            .unwrap();

        assert_eq!(
            store.add_protected_storage_entry(entry, &alice_addr()).await,
            Err(OverlayError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn test_receiver_removes_and_old_entry_cannot_return() {
        let (store, alice, bob, payload) = setup();
        let receiver = bob.pub_key_ring().signature_pub_key;
        let added = store
            .get_mailbox_data_with_signed_seq_nr(payload.clone(), &alice, receiver)
            .unwrap();
        store.add_protected_storage_entry(added.clone(), &alice_addr()).await.unwrap();

        let removal = store
            .get_mailbox_data_with_signed_seq_nr(payload.clone(), &bob, receiver)
            .unwrap();
        assert_eq!(removal.sequence_number, 2);
        assert!(store.remove(removal, &NodeAddress::new("bob.onion", 9999)));
        assert!(!store.contains(&payload.hash()));

        assert_eq!(
            store.add_protected_storage_entry(added, &alice_addr()).await,
            Err(OverlayError::DuplicateEntry)
        );
    }

    #[tokio::test]
    async fn test_third_party_cannot_remove() {
        let (store, alice, bob, payload) = setup();
        let receiver = bob.pub_key_ring().signature_pub_key;
        let added = store
            .get_mailbox_data_with_signed_seq_nr(payload.clone(), &alice, receiver)
            .unwrap();
        store.add_protected_storage_entry(added, &alice_addr()).await.unwrap();

        let mallory = KeyRing::generate();
        let removal = store
            .get_mailbox_data_with_signed_seq_nr(payload.clone(), &mallory, receiver)
            .unwrap();
        assert!(!store.remove(removal, &alice_addr()));
        assert!(store.contains(&payload.hash()));
    }

    #[tokio::test]
    async fn test_configured_broadcast_result() {
        let (store, alice, bob, payload) = setup();
        store.set_broadcast_result(BroadcastResult::Insufficient {
            completed: 0,
            failed: 3,
        });
        let entry = store
            .get_mailbox_data_with_signed_seq_nr(payload, &alice, bob.pub_key_ring().signature_pub_key)
            .unwrap();
        assert_eq!(
            store.add_protected_storage_entry(entry, &alice_addr()).await,
            Ok(BroadcastResult::Insufficient {
                completed: 0,
                failed: 3
            })
        );
    }
}
