//! # Key Rings
//!
//! A node owns one [`KeyRing`]: an Ed25519 signature key pair and an X25519
//! encryption key. Its public half, [`PubKeyRing`], is what peers address
//! mailbox messages to.

use serde::{Deserialize, Serialize};

use crate::key_exchange::{X25519PublicKey, X25519StaticPrivateKey};
use crate::signatures::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};

/// Public keys of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PubKeyRing {
    /// Verifies the node's signatures; also authorises mailbox removal.
    pub signature_pub_key: Ed25519PublicKey,
    /// Target of sealed envelopes.
    pub encryption_pub_key: X25519PublicKey,
}

/// Private keys of a node.
pub struct KeyRing {
    signature_key_pair: Ed25519KeyPair,
    encryption_key: X25519StaticPrivateKey,
    pub_key_ring: PubKeyRing,
}

impl KeyRing {
    /// Generate a fresh key ring.
    pub fn generate() -> Self {
        Self::from_parts(Ed25519KeyPair::generate(), X25519StaticPrivateKey::generate())
    }

    /// Rebuild a key ring from persisted seeds.
    pub fn from_seeds(signature_seed: [u8; 32], encryption_seed: [u8; 32]) -> Self {
        Self::from_parts(
            Ed25519KeyPair::from_seed(signature_seed),
            X25519StaticPrivateKey::from_bytes(encryption_seed),
        )
    }

    fn from_parts(signature_key_pair: Ed25519KeyPair, encryption_key: X25519StaticPrivateKey) -> Self {
        let pub_key_ring = PubKeyRing {
            signature_pub_key: signature_key_pair.public_key(),
            encryption_pub_key: encryption_key.public_key(),
        };
        Self {
            signature_key_pair,
            encryption_key,
            pub_key_ring,
        }
    }

    /// Public half of this key ring.
    pub fn pub_key_ring(&self) -> &PubKeyRing {
        &self.pub_key_ring
    }

    /// Sign with the signature key.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        self.signature_key_pair.sign(message)
    }

    pub(crate) fn encryption_key(&self) -> &X25519StaticPrivateKey {
        &self.encryption_key
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRing")
            .field("pub_key_ring", &self.pub_key_ring)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_rings_differ() {
        let a = KeyRing::generate();
        let b = KeyRing::generate();
        assert_ne!(a.pub_key_ring(), b.pub_key_ring());
    }

    #[test]
    fn test_from_seeds_is_stable() {
        let a = KeyRing::from_seeds([1; 32], [2; 32]);
        let b = KeyRing::from_seeds([1; 32], [2; 32]);
        assert_eq!(a.pub_key_ring(), b.pub_key_ring());
    }

    #[test]
    fn test_signature_verifies_with_pub_ring() {
        let ring = KeyRing::generate();
        let sig = ring.sign(b"hello");
        assert!(ring
            .pub_key_ring()
            .signature_pub_key
            .verify(b"hello", &sig)
            .is_ok());
    }
}
