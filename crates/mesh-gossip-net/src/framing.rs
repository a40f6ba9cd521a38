//! Protocol message framing for stream transports
//!
//! Provides length-prefixed framing of tagged protocol messages.

use bytes::{Buf, BufMut, BytesMut};
use mesh_gossip_core::{ProtocolMsg, ProtocolTag, MAX_FEASIBLE_MESSAGE_LEN};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size: the largest gossip fragment plus envelope headroom
pub const MAX_FRAME_SIZE: usize = MAX_FEASIBLE_MESSAGE_LEN + 64 * 1024;

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame too large: {0} bytes (max {MAX_FRAME_SIZE})")]
    TooLarge(usize),
    #[error("Empty frame")]
    Empty,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] mesh_gossip_core::Error),
}

/// Codec for length-prefixed protocol messages
///
/// Wire format:
/// - 4 bytes: length (big-endian, includes tag byte)
/// - 1 byte: protocol tag
/// - N bytes: payload
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = ProtocolMsg;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        // Peek at length
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }
        if length == 0 {
            return Err(FrameError::Empty);
        }

        // Need full frame
        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let tag = ProtocolTag::try_from(src[0])?;
        src.advance(1);

        let payload = src.split_to(length - 1).to_vec();

        Ok(Some(ProtocolMsg { tag, payload }))
    }
}

impl Encoder<ProtocolMsg> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: ProtocolMsg, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = 1 + item.payload.len();
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }

        dst.reserve(4 + length);
        dst.put_u32(length as u32);
        dst.put_u8(item.tag as u8);
        dst.put_slice(&item.payload);

        Ok(())
    }
}
