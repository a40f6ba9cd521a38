//! Wire envelope for gossip protocol messages
//!
//! Every gossip message payload is a sequence of postcard-encoded fields:
//!
//! - Unicast: channel name, source peer, destination peer, payload bytes
//! - Broadcast: channel name, source peer, payload bytes
//! - Gossip: channel name, source peer, payload bytes
//!
//! Fields carry no outer framing, so a receiver reads them one at a time and
//! can resolve the channel before parsing anything mode specific. All peers in
//! a mesh must agree on this field order.

use crate::error::Result;
use crate::types::PeerName;

/// Encode a unicast envelope.
pub fn encode_unicast(
    channel: &str,
    src: PeerName,
    dest: PeerName,
    payload: &[u8],
) -> Result<Vec<u8>> {
    Ok(postcard::to_allocvec(&(channel, src, dest, payload))?)
}

/// Encode a broadcast envelope.
pub fn encode_broadcast(channel: &str, src: PeerName, payload: &[u8]) -> Result<Vec<u8>> {
    Ok(postcard::to_allocvec(&(channel, src, payload))?)
}

/// Encode a gossip envelope. Same layout as broadcast; only the protocol
/// tag tells them apart.
pub fn encode_gossip(channel: &str, src: PeerName, payload: &[u8]) -> Result<Vec<u8>> {
    encode_broadcast(channel, src, payload)
}

/// Incremental reader over an encoded envelope.
#[derive(Clone, Copy, Debug)]
pub struct EnvelopeReader<'a> {
    rest: &'a [u8],
}

impl<'a> EnvelopeReader<'a> {
    /// Start reading at the beginning of an envelope
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { rest: bytes }
    }

    /// Read the channel name
    pub fn channel_name(&mut self) -> Result<&'a str> {
        self.take()
    }

    /// Read a peer name (source or destination)
    pub fn peer(&mut self) -> Result<PeerName> {
        self.take()
    }

    /// Read the opaque payload, borrowing from the envelope
    pub fn payload(&mut self) -> Result<&'a [u8]> {
        self.take()
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> &'a [u8] {
        self.rest
    }

    fn take<T: serde::Deserialize<'a>>(&mut self) -> Result<T> {
        let (value, rest) = postcard::take_from_bytes(self.rest)?;
        self.rest = rest;
        Ok(value)
    }
}
