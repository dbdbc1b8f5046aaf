//! # Shared Types Crate
//!
//! Network-wide primitives used by the mailbox overlay and by the
//! collaborators it talks to (transport, peer manager, replicated store).
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: addresses, capability sets and content
//!   hashes are defined once and shared.
//! - **No I/O**: plain data plus parsing.

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
