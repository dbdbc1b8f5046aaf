//! # Ports Module
//!
//! Hexagonal architecture ports: the API we offer (inbound) and the
//! collaborators we depend on (outbound).

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
