//! # Error Types
//!
//! Defines error types for parsing shared primitives.

use thiserror::Error;

/// Errors raised when parsing a [`crate::NodeAddress`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// No `:` separator between host and port.
    #[error("Missing port in address: {0}")]
    MissingPort(String),

    /// Host part is empty.
    #[error("Empty host name in address: {0}")]
    EmptyHost(String),

    /// Port is not a valid u16.
    #[error("Invalid port in address: {0}")]
    InvalidPort(String),
}

/// Errors raised when parsing a [`crate::PayloadHash`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashParseError {
    /// Not valid hex.
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    /// Wrong number of bytes.
    #[error("Invalid hash length: expected 32, got {0}")]
    InvalidLength(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_error_display() {
        let err = AddressError::MissingPort("localhost".to_string());
        assert!(err.to_string().contains("localhost"));
    }

    #[test]
    fn test_hash_error_display() {
        let err = HashParseError::InvalidLength(12);
        assert!(err.to_string().contains("12"));
    }
}
