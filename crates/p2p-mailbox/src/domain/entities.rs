//! # Mailbox Entities
//!
//! ## Clusters
//!
//! - **Application envelopes**: `MailboxMessage`, `NetworkEnvelope`
//! - **Wire / overlay forms**: `PrefixedSealedAndSignedMessage`,
//!   `MailboxStoragePayload`, `ProtectedMailboxStorageEntry`,
//!   `ProtectedStorageEntry`, `StorageChange`
//! - **Receive side**: `DecryptedMessageWithPubKey`, `MailboxItem`

use serde::{Deserialize, Serialize};
use shared_crypto::{sha256_concat, Ed25519PublicKey, Ed25519Signature, SealedAndSigned};
use shared_types::{Capabilities, NodeAddress, PayloadHash, Timestamp};

use super::value_objects::MAILBOX_TTL_MILLIS;

// =============================================================================
// CLUSTER A: APPLICATION ENVELOPES
// =============================================================================

/// An application message that must survive the recipient being offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxMessage {
    /// Sender-assigned id, stable across all gossiped copies.
    pub uid: String,
    /// Where the sender can be reached.
    pub sender_node_address: NodeAddress,
    /// Application message kind, e.g. `AckMessage`.
    pub message_type: String,
    /// Message-type-specific payload.
    pub body: Vec<u8>,
    /// Time to live in the overlay.
    pub ttl_millis: u64,
    /// Set for messages that only peers with these capabilities understand.
    pub required_capabilities: Option<Capabilities>,
}

impl MailboxMessage {
    /// Create a message with the default mailbox TTL.
    pub fn new(
        uid: impl Into<String>,
        sender_node_address: NodeAddress,
        message_type: impl Into<String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            uid: uid.into(),
            sender_node_address,
            message_type: message_type.into(),
            body,
            ttl_millis: MAILBOX_TTL_MILLIS,
            required_capabilities: None,
        }
    }

    /// Mark the message as requiring peer capabilities.
    pub fn with_required_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.required_capabilities = Some(capabilities);
        self
    }

    /// Capabilities the recipient must support, if any.
    pub fn required_capabilities(&self) -> Option<&Capabilities> {
        self.required_capabilities.as_ref()
    }
}

/// Anything that can be sealed to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkEnvelope {
    /// Store-and-forward message.
    Mailbox(MailboxMessage),
    /// Direct-only message; never valid inside a mailbox entry.
    Direct {
        /// Message kind
        message_type: String,
        /// Payload
        body: Vec<u8>,
    },
}

impl NetworkEnvelope {
    /// The mailbox message, if this is one.
    pub fn as_mailbox_message(&self) -> Option<&MailboxMessage> {
        match self {
            Self::Mailbox(message) => Some(message),
            Self::Direct { .. } => None,
        }
    }
}

// =============================================================================
// CLUSTER B: WIRE / OVERLAY FORMS
// =============================================================================

/// Sealed envelope plus the cleartext routing hints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrefixedSealedAndSignedMessage {
    /// Sender address.
    pub sender_node_address: NodeAddress,
    /// Ciphertext and signature.
    pub sealed_and_signed: SealedAndSigned,
    /// Empty when the recipient has `NoAddressPrefix`.
    pub address_prefix_hash: Vec<u8>,
    /// Cleartext copy of the message uid.
    pub uid: String,
}

/// Overlay-storable form of a mailbox message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MailboxStoragePayload {
    /// The sealed message.
    pub prefixed_sealed_and_signed_message: PrefixedSealedAndSignedMessage,
    /// Sender's signature key; signs the add operation.
    pub sender_pub_key_for_add_operation: Ed25519PublicKey,
    /// Receiver's signature key; authorises removal.
    pub owner_pub_key: Ed25519PublicKey,
    /// Time to live.
    pub ttl_millis: u64,
}

impl MailboxStoragePayload {
    /// Content address of this payload.
    pub fn hash(&self) -> PayloadHash {
        let msg = &self.prefixed_sealed_and_signed_message;
        let sealed = &msg.sealed_and_signed;
        let address = msg.sender_node_address.full_address();
        let len = |b: &[u8]| (b.len() as u32).to_be_bytes();

        PayloadHash(sha256_concat(&[
            &len(address.as_bytes()),
            address.as_bytes(),
            sealed.ephemeral_pub_key.as_bytes(),
            sealed.nonce.as_bytes(),
            &len(&sealed.ciphertext),
            &sealed.ciphertext,
            &len(&msg.address_prefix_hash),
            &msg.address_prefix_hash,
            &len(msg.uid.as_bytes()),
            msg.uid.as_bytes(),
            self.sender_pub_key_for_add_operation.as_bytes(),
            self.owner_pub_key.as_bytes(),
            &self.ttl_millis.to_be_bytes(),
        ]))
    }

    /// Cleartext uid.
    pub fn uid(&self) -> &str {
        &self.prefixed_sealed_and_signed_message.uid
    }
}

/// Signed, sequence-numbered overlay entry holding a mailbox payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedMailboxStorageEntry {
    /// Stored payload.
    pub payload: MailboxStoragePayload,
    /// Key that signed this entry (sender on add, receiver on remove).
    pub owner_pub_key: Ed25519PublicKey,
    /// Monotonic per payload.
    pub sequence_number: u32,
    /// Signature over `(payload hash, sequence number)`.
    pub signature: Ed25519Signature,
    /// When the overlay first saw it.
    pub creation_time_stamp: Timestamp,
    /// Receiver's signature key.
    pub receivers_pub_key: Ed25519PublicKey,
}

impl ProtectedMailboxStorageEntry {
    /// Bytes covered by the entry signature.
    pub fn signing_bytes(hash: &PayloadHash, sequence_number: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(36);
        buf.extend_from_slice(&hash.0);
        buf.extend_from_slice(&sequence_number.to_be_bytes());
        buf
    }

    /// Payload content address.
    pub fn hash(&self) -> PayloadHash {
        self.payload.hash()
    }

    /// Cleartext uid of the sealed message.
    pub fn uid(&self) -> &str {
        self.payload.uid()
    }

    /// True once the entry is older than `ttl_millis`.
    pub fn is_expired(&self, now: Timestamp, ttl_millis: u64) -> bool {
        now.millis_since(self.creation_time_stamp) > ttl_millis
    }
}

/// Non-mailbox overlay data (offers, statistics, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericStorageEntry {
    /// Content address.
    pub payload_hash: PayloadHash,
    /// Opaque payload.
    pub data: Vec<u8>,
    /// When the overlay first saw it.
    pub creation_time_stamp: Timestamp,
}

/// Any overlay entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectedStorageEntry {
    /// Mailbox-class entry.
    Mailbox(ProtectedMailboxStorageEntry),
    /// Everything else.
    Generic(GenericStorageEntry),
}

impl ProtectedStorageEntry {
    /// Content address.
    pub fn hash(&self) -> PayloadHash {
        match self {
            Self::Mailbox(entry) => entry.hash(),
            Self::Generic(entry) => entry.payload_hash,
        }
    }

    /// Mailbox entry, if this is one.
    pub fn into_mailbox(self) -> Option<ProtectedMailboxStorageEntry> {
        match self {
            Self::Mailbox(entry) => Some(entry),
            Self::Generic(_) => None,
        }
    }
}

/// One change notification from the overlay.
#[derive(Debug, Clone, Default)]
pub struct StorageChange {
    /// Newly added entries.
    pub added: Vec<ProtectedStorageEntry>,
    /// Removed entries.
    pub removed: Vec<ProtectedStorageEntry>,
}

/// Handle returned by a successful direct send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Remote end.
    pub peer: NodeAddress,
}

// =============================================================================
// CLUSTER C: RECEIVE SIDE
// =============================================================================

/// A decrypted envelope with the sender's verified signature key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptedMessageWithPubKey {
    /// Decrypted envelope.
    pub network_envelope: NetworkEnvelope,
    /// Sender's signature key.
    pub signature_pub_key: Ed25519PublicKey,
}

impl DecryptedMessageWithPubKey {
    /// The mailbox message, if the envelope is one.
    pub fn mailbox_message(&self) -> Option<&MailboxMessage> {
        self.network_envelope.as_mailbox_message()
    }
}

/// A successfully decrypted overlay entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxItem {
    /// The overlay entry it came from.
    pub protected_mailbox_storage_entry: ProtectedMailboxStorageEntry,
    /// Decrypted content.
    pub decrypted_message_with_pub_key: DecryptedMessageWithPubKey,
}

impl MailboxItem {
    /// Pair an entry with its decrypted content.
    ///
    /// Returns `None` if the envelope is not a mailbox message.
    pub fn new(
        protected_mailbox_storage_entry: ProtectedMailboxStorageEntry,
        decrypted_message_with_pub_key: DecryptedMessageWithPubKey,
    ) -> Option<Self> {
        decrypted_message_with_pub_key.mailbox_message()?;
        Some(Self {
            protected_mailbox_storage_entry,
            decrypted_message_with_pub_key,
        })
    }

    /// The decrypted mailbox message.
    pub fn mailbox_message(&self) -> Option<&MailboxMessage> {
        self.decrypted_message_with_pub_key.mailbox_message()
    }

    /// Uid of the decrypted message.
    pub fn uid(&self) -> &str {
        self.mailbox_message()
            .map(|m| m.uid.as_str())
            .unwrap_or_else(|| self.protected_mailbox_storage_entry.uid())
    }

    /// Payload content address.
    pub fn payload_hash(&self) -> PayloadHash {
        self.protected_mailbox_storage_entry.hash()
    }
}
