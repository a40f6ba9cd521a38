//! Error types for mesh gossip

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Mesh gossip error types
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// Protocol tag byte outside the gossip range
    #[error("unknown protocol tag: {0}")]
    UnknownProtocolTag(u8),
}
