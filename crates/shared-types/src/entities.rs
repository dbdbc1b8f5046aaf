//! # Core Network Entities
//!
//! ## Clusters
//!
//! - **Addressing**: `NodeAddress`
//! - **Protocol negotiation**: `Capability`, `Capabilities`
//! - **Storage**: `PayloadHash`, `Timestamp`

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{AddressError, HashParseError};

// =============================================================================
// CLUSTER A: ADDRESSING
// =============================================================================

/// Overlay address of a node (onion host name plus port).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Host name, e.g. `abcdef.onion` or `localhost`.
    pub host_name: String,
    /// Listening port.
    pub port: u16,
}

impl NodeAddress {
    /// Create an address from its parts.
    pub fn new(host_name: impl Into<String>, port: u16) -> Self {
        Self {
            host_name: host_name.into(),
            port,
        }
    }

    /// `host:port` form.
    pub fn full_address(&self) -> String {
        format!("{}:{}", self.host_name, self.port)
    }

    /// SHA-256 of the first two characters of the full address.
    ///
    /// Older peers use it to cheaply discard sealed messages that are not
    /// for them. Peers with [`Capability::NoAddressPrefix`] ignore it.
    pub fn address_prefix_hash(&self) -> Vec<u8> {
        let full = self.full_address();
        let prefix: String = full.chars().take(2).collect();
        Sha256::digest(prefix.as_bytes()).to_vec()
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_name, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;
        if host.is_empty() {
            return Err(AddressError::EmptyHost(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressError::InvalidPort(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

// =============================================================================
// CLUSTER B: PROTOCOL NEGOTIATION
// =============================================================================

/// A negotiated protocol feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// Node is a seed node.
    SeedNode,
    /// Peer does not need the address prefix hash on sealed messages.
    NoAddressPrefix,
    /// Peer understands ack messages.
    AckMsg,
    /// Peer understands trade statistics v3.
    TradeStatistics3,
    /// Peer supports mediation messages.
    Mediation,
    /// Peer supports refund agent messages.
    RefundAgent,
    /// Peer supports signed account age witnesses.
    SignedAccountAgeWitness,
}

/// The set of capabilities a peer announced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a capability.
    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    /// Check a single capability.
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// True if every capability in `required` is present.
    pub fn contains_all(&self, required: &Capabilities) -> bool {
        required.0.is_subset(&self.0)
    }

    /// Number of capabilities.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no capability is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in stable order.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// =============================================================================
// CLUSTER C: STORAGE
// =============================================================================

/// 32-byte content address of an overlay payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PayloadHash(pub [u8; 32]);

impl PayloadHash {
    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, HashParseError> {
        let bytes = hex::decode(s).map_err(|e| HashParseError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashParseError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Lower-case hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PayloadHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayloadHash({}..)", &self.to_hex()[..8])
    }
}

impl fmt::Display for PayloadHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create from milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Wall-clock now.
    pub fn now() -> Self {
        Self(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        )
    }

    /// Milliseconds value.
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed from `earlier` to `self` (zero if negative).
    pub const fn millis_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}
