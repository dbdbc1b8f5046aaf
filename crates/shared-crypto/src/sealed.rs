//! # Sealed and Signed Envelopes
//!
//! Hybrid scheme used for mailbox payloads:
//!
//! 1. Sender signs (recipient encryption pub || plaintext) with Ed25519.
//! 2. Fresh ephemeral X25519 secret, Diffie-Hellman with the recipient's
//!    encryption key.
//! 3. Symmetric key = SHA-256(domain || shared secret || ephemeral pub || recipient pub).
//! 4. XChaCha20-Poly1305 over (sender sig pub || signature || plaintext).
//!
//! The sender key and signature only exist inside the ciphertext, so an
//! observer of the envelope cannot re-attribute it to another key.
//!
//! Opening with a key ring the envelope was not addressed to fails at step 4
//! with [`CryptoError::DecryptionFailed`].

use serde::{Deserialize, Serialize};

use crate::hashing::sha256_concat;
use crate::key_exchange::{X25519PublicKey, X25519StaticPrivateKey};
use crate::keyring::{KeyRing, PubKeyRing};
use crate::signatures::{Ed25519PublicKey, Ed25519Signature};
use crate::symmetric::{self, Nonce, SecretKey};
use crate::CryptoError;

const SEAL_KEY_DOMAIN: &[u8] = b"P2P-MAILBOX-SEAL-v1";
const SEAL_SIGN_DOMAIN: &[u8] = b"P2P-MAILBOX-SIGN-v1";

const SIG_KEY_LEN: usize = 32;
const SIGNATURE_LEN: usize = 64;
const HEADER_LEN: usize = SIG_KEY_LEN + SIGNATURE_LEN;

/// Encrypted, signed payload addressed to one recipient.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SealedAndSigned {
    /// Ephemeral X25519 public key used for this envelope.
    pub ephemeral_pub_key: X25519PublicKey,
    /// XChaCha20 nonce.
    pub nonce: Nonce,
    /// Encrypted (sender sig pub || signature || plaintext), with Poly1305 tag.
    pub ciphertext: Vec<u8>,
}

fn signed_bytes(recipient: &X25519PublicKey, plaintext: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SEAL_SIGN_DOMAIN.len() + 32 + plaintext.len());
    buf.extend_from_slice(SEAL_SIGN_DOMAIN);
    buf.extend_from_slice(recipient.as_bytes());
    buf.extend_from_slice(plaintext);
    buf
}

fn derive_key(shared: &[u8; 32], ephemeral: &X25519PublicKey, recipient: &X25519PublicKey) -> SecretKey {
    SecretKey::from_bytes(sha256_concat(&[
        SEAL_KEY_DOMAIN,
        shared,
        ephemeral.as_bytes(),
        recipient.as_bytes(),
    ]))
}

/// Seal `plaintext` to `recipient` and sign it with `sender`'s key.
pub fn seal_and_sign(
    sender: &KeyRing,
    recipient: &PubKeyRing,
    plaintext: &[u8],
) -> Result<SealedAndSigned, CryptoError> {
    let signature = sender.sign(&signed_bytes(&recipient.encryption_pub_key, plaintext));

    let mut inner = Vec::with_capacity(HEADER_LEN + plaintext.len());
    inner.extend_from_slice(sender.pub_key_ring().signature_pub_key.as_bytes());
    inner.extend_from_slice(signature.as_bytes());
    inner.extend_from_slice(plaintext);

    let ephemeral = X25519StaticPrivateKey::generate();
    let ephemeral_pub_key = ephemeral.public_key();
    let shared = ephemeral.diffie_hellman(&recipient.encryption_pub_key);
    let key = derive_key(shared.as_bytes(), &ephemeral_pub_key, &recipient.encryption_pub_key);

    let (ciphertext, nonce) = symmetric::encrypt(&key, &inner)?;

    Ok(SealedAndSigned {
        ephemeral_pub_key,
        nonce,
        ciphertext,
    })
}

/// Open an envelope addressed to `own` and verify the sender's signature.
///
/// Returns the plaintext and the sender's verified signature key.
pub fn open_and_verify(
    own: &KeyRing,
    sealed: &SealedAndSigned,
) -> Result<(Vec<u8>, Ed25519PublicKey), CryptoError> {
    let own_pub = own.pub_key_ring().encryption_pub_key;
    let shared = own.encryption_key().diffie_hellman(&sealed.ephemeral_pub_key);
    let key = derive_key(shared.as_bytes(), &sealed.ephemeral_pub_key, &own_pub);

    let mut inner = symmetric::decrypt(&key, &sealed.ciphertext, &sealed.nonce)?;
    if inner.len() < HEADER_LEN {
        return Err(CryptoError::DecryptionFailed("truncated envelope".into()));
    }

    let mut key_bytes = [0u8; SIG_KEY_LEN];
    key_bytes.copy_from_slice(&inner[..SIG_KEY_LEN]);
    let mut sig_bytes = [0u8; SIGNATURE_LEN];
    sig_bytes.copy_from_slice(&inner[SIG_KEY_LEN..HEADER_LEN]);
    let plaintext = inner.split_off(HEADER_LEN);

    let sender = Ed25519PublicKey::from_bytes(key_bytes)?;
    sender.verify(
        &signed_bytes(&own_pub, &plaintext),
        &Ed25519Signature::from_bytes(sig_bytes),
    )?;

    Ok((plaintext, sender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_can_open() {
        let alice = KeyRing::generate();
        let bob = KeyRing::generate();

        let sealed = seal_and_sign(&alice, bob.pub_key_ring(), b"trade ack").unwrap();
        let (plaintext, sender) = open_and_verify(&bob, &sealed).unwrap();

        assert_eq!(plaintext, b"trade ack");
        assert_eq!(sender, alice.pub_key_ring().signature_pub_key);
    }

    #[test]
    fn test_other_node_cannot_open() {
        let alice = KeyRing::generate();
        let bob = KeyRing::generate();
        let carol = KeyRing::generate();

        let sealed = seal_and_sign(&alice, bob.pub_key_ring(), b"for bob").unwrap();
        let result = open_and_verify(&carol, &sealed);

        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn test_sender_key_swap_in_ciphertext_rejected() {
        let alice = KeyRing::generate();
        let bob = KeyRing::generate();
        let mallory = KeyRing::generate();

        // XChaCha20 is malleable: flip Alice's key bytes into Mallory's.
        let mut sealed = seal_and_sign(&alice, bob.pub_key_ring(), b"alice's trade msg").unwrap();
        let alice_key = alice.pub_key_ring().signature_pub_key;
        let mallory_key = mallory.pub_key_ring().signature_pub_key;
        for i in 0..SIG_KEY_LEN {
            sealed.ciphertext[i] ^= alice_key.as_bytes()[i] ^ mallory_key.as_bytes()[i];
        }

        assert!(matches!(
            open_and_verify(&bob, &sealed),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_signature_bound_to_recipient() {
        let alice = KeyRing::generate();
        let bob = KeyRing::generate();
        let carol = KeyRing::generate();

        // Carol forwards Alice's signed plaintext to Bob under a fresh seal.
        let sealed = seal_and_sign(&alice, carol.pub_key_ring(), b"for carol").unwrap();
        let (plaintext, _) = open_and_verify(&carol, &sealed).unwrap();
        let signature = alice.sign(&signed_bytes(&carol.pub_key_ring().encryption_pub_key, &plaintext));

        let mut inner = Vec::new();
        inner.extend_from_slice(alice.pub_key_ring().signature_pub_key.as_bytes());
        inner.extend_from_slice(signature.as_bytes());
        inner.extend_from_slice(&plaintext);
        let ephemeral = X25519StaticPrivateKey::generate();
        let ephemeral_pub_key = ephemeral.public_key();
        let bob_pub = bob.pub_key_ring().encryption_pub_key;
        let key = derive_key(
            ephemeral.diffie_hellman(&bob_pub).as_bytes(),
            &ephemeral_pub_key,
            &bob_pub,
        );
        let (ciphertext, nonce) = symmetric::encrypt(&key, &inner).unwrap();
        let forwarded = SealedAndSigned {
            ephemeral_pub_key,
            nonce,
            ciphertext,
        };

        assert_eq!(
            open_and_verify(&bob, &forwarded),
            Err(CryptoError::SignatureVerificationFailed)
        );
    }

    #[test]
    fn test_mallory_seal_reports_mallory() {
        let bob = KeyRing::generate();
        let mallory = KeyRing::generate();

        let sealed = seal_and_sign(&mallory, bob.pub_key_ring(), b"hello").unwrap();
        let (_, sender) = open_and_verify(&bob, &sealed).unwrap();

        assert_eq!(sender, mallory.pub_key_ring().signature_pub_key);
    }

    #[test]
    fn test_each_seal_uses_fresh_ephemeral_key() {
        let alice = KeyRing::generate();
        let bob = KeyRing::generate();

        let a = seal_and_sign(&alice, bob.pub_key_ring(), b"same").unwrap();
        let b = seal_and_sign(&alice, bob.pub_key_ring(), b"same").unwrap();

        assert_ne!(a.ephemeral_pub_key, b.ephemeral_pub_key);
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
