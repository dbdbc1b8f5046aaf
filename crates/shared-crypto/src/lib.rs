//! # Shared Crypto - Mailbox Sealing Primitives
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `symmetric` | XChaCha20-Poly1305 | Payload encryption |
//! | `key_exchange` | X25519 | Per-envelope key agreement |
//! | `signatures` | Ed25519 | Sender authentication, removal authorisation |
//! | `hashing` | SHA-256 | Content addressing, key derivation |
//! | `keyring` | - | `KeyRing` / `PubKeyRing` |
//! | `sealed` | hybrid | `SealedAndSigned` envelopes |
//!
//! ## Security Properties
//!
//! - **XChaCha20**: 192-bit random nonce, constant-time
//! - **X25519**: fresh ephemeral secret per envelope
//! - **Ed25519**: deterministic nonces, no RNG dependency when signing

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod hashing;
pub mod key_exchange;
pub mod keyring;
pub mod sealed;
pub mod signatures;
pub mod symmetric;

// Re-exports
pub use errors::CryptoError;
pub use hashing::{sha256, sha256_concat, Hash};
pub use key_exchange::X25519PublicKey;
pub use keyring::{KeyRing, PubKeyRing};
pub use sealed::{open_and_verify, seal_and_sign, SealedAndSigned};
pub use signatures::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
