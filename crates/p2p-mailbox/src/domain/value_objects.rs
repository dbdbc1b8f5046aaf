//! # Value Objects
//!
//! Small state and outcome types plus protocol constants.

use super::entities::MailboxItem;
use super::errors::MailboxError;

/// Mailbox payloads live 15 days in the overlay.
pub const MAILBOX_TTL_MILLIS: u64 = 15 * 24 * 60 * 60 * 1000;

/// Delay before retrying a removal requested before bootstrap.
pub const REMOVE_RETRY_DELAY_SECS: u64 = 30;

/// Bootstrap lifecycle. `Bootstrapped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootstrapState {
    /// Overlay events are not consumed yet; sends fail fast.
    #[default]
    NotBootstrapped,
    /// Subscribed to the overlay and caught up with its snapshot.
    Bootstrapped,
}

impl BootstrapState {
    /// True once bootstrapped.
    pub fn is_bootstrapped(&self) -> bool {
        matches!(self, Self::Bootstrapped)
    }
}

/// Terminal result of one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered directly to the online peer.
    Arrived,
    /// Published to the overlay and sufficiently broadcast.
    StoredInMailbox,
    /// Failed; see the error.
    Fault(MailboxError),
}

/// Broadcast acknowledgement of an overlay add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastResult {
    /// Enough peers acknowledged.
    Sufficient {
        /// Peers reached
        completed: usize,
    },
    /// Too few peers acknowledged.
    Insufficient {
        /// Peers reached
        completed: usize,
        /// Peers that failed
        failed: usize,
    },
}

/// What happened to one observed mailbox entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptOutcome {
    /// Addressed to us and well formed.
    Decrypted(Box<MailboxItem>),
    /// Not addressed to us; remember the uid.
    NotForUs {
        /// Cleartext uid
        uid: String,
        /// Entry creation time, used for TTL pruning
        creation_time_stamp: shared_types::Timestamp,
    },
    /// Addressed to us but unusable; dropped.
    Malformed {
        /// Cleartext uid
        uid: String,
        /// Why it was rejected
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_default() {
        assert_eq!(BootstrapState::default(), BootstrapState::NotBootstrapped);
        assert!(!BootstrapState::NotBootstrapped.is_bootstrapped());
        assert!(BootstrapState::Bootstrapped.is_bootstrapped());
    }

    #[test]
    fn test_ttl_is_fifteen_days() {
        assert_eq!(MAILBOX_TTL_MILLIS, 1_296_000_000);
    }
}
