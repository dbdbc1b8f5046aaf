//! # Domain Module
//!
//! Core domain types for mailbox messaging.

pub mod entities;
pub mod errors;
pub mod ignored;
pub mod index;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use ignored::*;
pub use index::*;
pub use value_objects::*;
