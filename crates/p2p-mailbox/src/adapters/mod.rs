//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implements outbound port traits for mailbox messaging.

mod clock;
mod encryption;
mod file_persistence;
mod memory_overlay;

pub use clock::SystemTimeSource;
pub use encryption::SealingEncryptionService;
pub use file_persistence::JsonFilePersistence;
pub use memory_overlay::{InMemoryDataStore, CHANGE_CHANNEL_CAPACITY};
