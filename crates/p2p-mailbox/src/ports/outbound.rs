//! # Outbound Ports
//!
//! Traits for the collaborators the mailbox service builds on: transport,
//! peer bookkeeping, the replicated data overlay, encryption, persistence
//! and time.
//!
//! Test doubles live in [`crate::testing`].

use async_trait::async_trait;
use shared_crypto::{CryptoError, Ed25519PublicKey, KeyRing, PubKeyRing, SealedAndSigned};
use shared_types::{Capabilities, Capability, NodeAddress, PayloadHash, Timestamp};
use tokio::sync::broadcast;

use crate::domain::{
    BroadcastResult, Connection, DecryptError, DecryptedMessageWithPubKey, MailboxStoragePayload,
    NetworkEnvelope, NetworkError, OverlayError, PersistenceError, PrefixedSealedAndSignedMessage,
    ProtectedMailboxStorageEntry, ProtectedStorageEntry, StorageChange,
};

/// Anonymizing transport.
#[async_trait]
pub trait NetworkNode: Send + Sync {
    /// Our own address, once the hidden service is published.
    fn node_address(&self) -> Option<NodeAddress>;

    /// Number of currently open connections.
    fn connection_count(&self) -> usize;

    /// Deliver a sealed message directly to `peer`.
    async fn send_message(
        &self,
        peer: &NodeAddress,
        message: PrefixedSealedAndSignedMessage,
    ) -> Result<Connection, NetworkError>;
}

/// Per-peer capability bookkeeping.
pub trait PeerManager: Send + Sync {
    /// True if `peer` announced `capability`.
    fn peer_has_capability(&self, peer: &NodeAddress, capability: Capability) -> bool;

    /// Last known capability set of `peer`, if any.
    fn find_peers_capabilities(&self, peer: &NodeAddress) -> Option<Capabilities>;
}

/// The gossiped, content-addressed overlay store.
#[async_trait]
pub trait P2PDataStorage: Send + Sync {
    /// Change notifications for entries added or removed from now on.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;

    /// All entries currently stored.
    fn snapshot(&self) -> Vec<ProtectedStorageEntry>;

    /// True if the overlay holds this payload.
    fn contains(&self, hash: &PayloadHash) -> bool;

    /// Wrap `payload` in an entry signed by `key_ring` with the next
    /// sequence number for that payload.
    fn get_mailbox_data_with_signed_seq_nr(
        &self,
        payload: MailboxStoragePayload,
        key_ring: &KeyRing,
        receivers_pub_key: Ed25519PublicKey,
    ) -> Result<ProtectedMailboxStorageEntry, CryptoError>;

    /// Store and broadcast an entry.
    async fn add_protected_storage_entry(
        &self,
        entry: ProtectedMailboxStorageEntry,
        sender: &NodeAddress,
    ) -> Result<BroadcastResult, OverlayError>;

    /// Remove an entry. Returns `false` if the overlay rejected the removal.
    fn remove(&self, entry: ProtectedMailboxStorageEntry, sender: &NodeAddress) -> bool;
}

/// Initial data sync with seed nodes.
pub trait RequestDataManager: Send + Sync {
    /// Ask a seed node for the preliminary data set.
    ///
    /// Returns `false` if no seed node is available, in which case no data
    /// response will ever arrive.
    fn request_preliminary_data(&self) -> bool;
}

/// Known seed nodes.
pub trait SeedNodeRepository: Send + Sync {
    /// True if `address` is a seed node.
    fn is_seed_node(&self, address: &NodeAddress) -> bool;
}

/// Seals and opens envelopes with this node's key ring.
pub trait EncryptionService: Send + Sync {
    /// Seal `envelope` to `peers_pub_key_ring` and sign it.
    fn encrypt_and_sign(
        &self,
        peers_pub_key_ring: &PubKeyRing,
        envelope: &NetworkEnvelope,
    ) -> Result<SealedAndSigned, CryptoError>;

    /// Open a sealed envelope and verify its sender.
    fn decrypt_and_verify(
        &self,
        sealed: &SealedAndSigned,
    ) -> Result<DecryptedMessageWithPubKey, DecryptError>;
}

/// Durable load/save of one aggregate.
pub trait PersistenceManager<T>: Send + Sync {
    /// Load the persisted value, `None` if nothing was stored yet.
    fn read_persisted(&self) -> Result<Option<T>, PersistenceError>;

    /// Store `value`.
    fn request_persistence(&self, value: &T) -> Result<(), PersistenceError>;
}

/// Wall clock.
pub trait TimeSource: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now(&self) -> Timestamp;
}
