//! # P2P Mailbox
//!
//! Encrypted store-and-forward messaging between peers of an anonymizing
//! P2P network.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Deliver a message to a peer that may be offline:
//! - Seal it to the recipient's public key ring and try a direct send
//! - If the peer is unreachable, store the sealed envelope in the replicated
//!   overlay, tagged with the recipient's signature key
//! - Every node tries to open every mailbox entry; the recipient succeeds,
//!   notifies listeners and removes the entry from the overlay
//!
//! ## Guarantees
//!
//! | Property | Mechanism |
//! |----------|-----------|
//! | At-most-once notification | Items indexed by payload hash before listeners run |
//! | Bounded decrypt work | Entries that fail to open are ignored by uid until they expire |
//! | Restart safety | Item list and ignored uids persisted once per event-loop iteration that changed them |
//! | Receiver-only removal | Removal entries signed with the receiver's key |
//!
//! ## Module Structure
//!
//! ```text
//! p2p-mailbox/
//! ├── domain/          # Messages, overlay entries, item index, ignored map, errors
//! ├── ports/           # API trait (inbound) + collaborator traits (outbound)
//! ├── application/     # MailboxMessageService and its event loop
//! ├── adapters/        # Sealing, JSON persistence, in-memory overlay, clock
//! ├── config.rs        # MailboxConfig
//! ├── telemetry.rs     # tracing subscriber setup
//! └── testing.rs       # Port doubles and TestNode
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;
pub mod testing;

// Re-exports
pub use adapters::{InMemoryDataStore, JsonFilePersistence, SealingEncryptionService, SystemTimeSource};
pub use application::{MailboxMessageService, MailboxPorts};
pub use config::{LogConfig, MailboxConfig};
pub use domain::{
    BootstrapState, BroadcastResult, ConfigError, DecryptError, DecryptOutcome,
    DecryptedMessageWithPubKey, IgnoredMailboxMap, MailboxError, MailboxItem, MailboxItemIndex,
    MailboxMessage, MailboxMessageList, MailboxStoragePayload, NetworkEnvelope, NetworkError,
    OverlayError, PersistenceError, PrefixedSealedAndSignedMessage, ProtectedMailboxStorageEntry,
    ProtectedStorageEntry, SendOutcome, StorageChange, MAILBOX_TTL_MILLIS,
    REMOVE_RETRY_DELAY_SECS,
};
pub use ports::{
    DecryptedMailboxListener, EncryptionService, ListenerHandle, MailboxMessagingApi, NetworkNode,
    P2PDataStorage, PeerManager, PendingSend, PersistenceManager, RequestDataManager,
    SeedNodeRepository, TimeSource,
};
pub use telemetry::init_tracing;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
