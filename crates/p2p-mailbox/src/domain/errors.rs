//! # Domain Errors
//!
//! Error types for mailbox messaging and its collaborators.

use thiserror::Error;

/// Public failure taxonomy of the mailbox service.
///
/// Only `OwnAddressUnknown`, `SelfSend` and `ServiceStopped` are ever
/// returned directly from an API call. Everything else reaches the caller
/// as [`crate::SendOutcome::Fault`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailboxError {
    /// Node is not bootstrapped yet, or has no live connections.
    #[error("Network not ready: {0}")]
    NotReady(String),

    /// No public key ring was supplied for the recipient.
    #[error("Recipient public key ring is missing")]
    MissingPubKeyRing,

    /// Recipient lacks (or has not announced) a required capability.
    #[error("Peer {peer} does not support the required capabilities")]
    CapabilityUnsupported {
        /// Recipient address
        peer: String,
    },

    /// Sealing or signing failed.
    #[error("Crypto failure: {0}")]
    CryptoFailure(String),

    /// Publish stored locally but did not reach enough peers.
    #[error("Message was not sufficiently broadcast: {completed} completed, {failed} failed")]
    BroadcastInsufficient {
        /// Peers that acknowledged
        completed: usize,
        /// Peers that failed
        failed: usize,
    },

    /// The overlay already holds this exact entry.
    #[error("Data already exists in the overlay")]
    DuplicateEntry,

    /// This node's own network address is not known yet.
    #[error("Own node address is not known")]
    OwnAddressUnknown,

    /// Recipient key ring is this node's own key ring.
    #[error("Refusing to send a mailbox message to our own key ring")]
    SelfSend,

    /// The service event loop has stopped.
    #[error("Mailbox service stopped")]
    ServiceStopped,
}

/// Outcome of a failed decrypt/verify.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptError {
    /// Ciphertext was not sealed to our keys, or the signature is forged.
    #[error("Envelope not addressed to us: {0}")]
    NotForUs(String),

    /// Plaintext could not be deserialized.
    #[error("Malformed envelope: {0}")]
    Malformed(String),
}

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// Peer could not be reached.
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    /// Connection dropped mid-send.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),
}

/// Rejections from the replicated data overlay.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverlayError {
    /// Identical (or older) entry already stored.
    #[error("Duplicate entry")]
    DuplicateEntry,

    /// Entry signature or owner key did not check out.
    #[error("Invalid entry signature")]
    InvalidSignature,
}

/// Durable storage failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Encode or decode failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Configuration failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Failed to read config: {0}")]
    Io(String),

    /// Config file is not valid TOML.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A value is out of range.
    #[error("Invalid config value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_error_names_peer() {
        let err = MailboxError::CapabilityUnsupported {
            peer: "bob.onion:9999".to_string(),
        };
        assert!(err.to_string().contains("bob.onion:9999"));
    }

    #[test]
    fn test_broadcast_insufficient_counts() {
        let err = MailboxError::BroadcastInsufficient {
            completed: 1,
            failed: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("1 completed"));
        assert!(msg.contains("4 failed"));
    }

    #[test]
    fn test_config_error_field() {
        let err = ConfigError::Invalid {
            field: "max_concurrent_batches",
            reason: "must be at least 1".to_string(),
        };
        assert!(err.to_string().contains("max_concurrent_batches"));
    }
}
