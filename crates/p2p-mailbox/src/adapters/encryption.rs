//! Sealing Encryption Adapter
//!
//! Implements `EncryptionService` with bincode-encoded envelopes sealed by
//! `shared-crypto` (ephemeral X25519, XChaCha20-Poly1305, Ed25519).

use std::sync::Arc;

use shared_crypto::{open_and_verify, seal_and_sign, CryptoError, KeyRing, PubKeyRing, SealedAndSigned};

use crate::domain::{DecryptError, DecryptedMessageWithPubKey, NetworkEnvelope};
use crate::ports::EncryptionService;

/// Encryption service bound to this node's key ring.
pub struct SealingEncryptionService {
    key_ring: Arc<KeyRing>,
}

impl SealingEncryptionService {
    /// Create a service for `key_ring`.
    pub fn new(key_ring: Arc<KeyRing>) -> Self {
        Self { key_ring }
    }
}

impl EncryptionService for SealingEncryptionService {
    fn encrypt_and_sign(
        &self,
        peers_pub_key_ring: &PubKeyRing,
        envelope: &NetworkEnvelope,
    ) -> Result<SealedAndSigned, CryptoError> {
        let plaintext =
            bincode::serialize(envelope).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        seal_and_sign(&self.key_ring, peers_pub_key_ring, &plaintext)
    }

    fn decrypt_and_verify(
        &self,
        sealed: &SealedAndSigned,
    ) -> Result<DecryptedMessageWithPubKey, DecryptError> {
        let (plaintext, signature_pub_key) = open_and_verify(&self.key_ring, sealed)
            .map_err(|e| DecryptError::NotForUs(e.to_string()))?;
        let network_envelope: NetworkEnvelope =
            bincode::deserialize(&plaintext).map_err(|e| DecryptError::Malformed(e.to_string()))?;

        Ok(DecryptedMessageWithPubKey {
            network_envelope,
            signature_pub_key,
        })
    }
}
