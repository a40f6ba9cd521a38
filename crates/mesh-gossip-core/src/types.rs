//! Core protocol types for mesh gossip
//!
//! All types here serialize via postcard. Field order matters for the wire
//! envelope, so these stay small and fixed.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest gossip fragment a peer will ever frame (100 MiB).
///
/// Anything larger means the application produced a runaway encoding.
pub const MAX_FEASIBLE_MESSAGE_LEN: usize = 100 * 1024 * 1024;

// =============================================================================
// PEER NAME
// =============================================================================

/// Unique identifier of a mesh node.
///
/// Displayed as six colon-separated hex octets, like a MAC address.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PeerName(pub u64);

impl From<u64> for PeerName {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for PeerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

/// Error parsing a [`PeerName`] from text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid peer name: {0:?}")]
pub struct ParsePeerNameError(String);

impl FromStr for PeerName {
    type Err = ParsePeerNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<&str> = s.split(':').collect();
        if octets.len() != 6 {
            return Err(ParsePeerNameError(s.to_string()));
        }
        let mut value = 0u64;
        for octet in octets {
            if octet.len() != 2 {
                return Err(ParsePeerNameError(s.to_string()));
            }
            let byte =
                u8::from_str_radix(octet, 16).map_err(|_| ParsePeerNameError(s.to_string()))?;
            value = (value << 8) | u64::from(byte);
        }
        Ok(Self(value))
    }
}

// =============================================================================
// PROTOCOL MESSAGES
// =============================================================================

/// Delivery mode of a protocol message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProtocolTag {
    /// Epidemic gossip to a random neighbour set
    Gossip = 4,
    /// Point-to-point gossip, relayed hop by hop
    GossipUnicast = 5,
    /// Gossip along the broadcast tree of its source
    GossipBroadcast = 6,
}

impl TryFrom<u8> for ProtocolTag {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(Self::Gossip),
            5 => Ok(Self::GossipUnicast),
            6 => Ok(Self::GossipBroadcast),
            _ => Err(Error::UnknownProtocolTag(value)),
        }
    }
}

/// A tagged payload handed to the transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolMsg {
    /// Delivery mode
    pub tag: ProtocolTag,
    /// Encoded envelope
    pub payload: Vec<u8>,
}

impl ProtocolMsg {
    /// Create a new protocol message
    pub fn new(tag: ProtocolTag, payload: Vec<u8>) -> Self {
        Self { tag, payload }
    }
}
