//! # Application Layer
//!
//! `MailboxMessageService` and the event loop that owns mailbox state.

mod decrypt;
mod send;
mod service;
mod worker;

pub use service::{MailboxMessageService, MailboxPorts};
