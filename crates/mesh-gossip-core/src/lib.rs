//! Mesh Gossip Core Library
//!
//! This crate provides the leaf types shared by every peer in a gossip mesh:
//! peer names, protocol tags, the application data contract and the
//! deterministic wire envelope carried inside protocol messages.
//!
//! # Modules
//!
//! - [`types`]: Peer names, protocol tags and protocol messages
//! - [`data`]: The mergeable gossip data contract
//! - [`envelope`]: Sequential postcard framing of gossip envelopes
//! - [`error`]: Error types

pub mod data;
pub mod envelope;
pub mod error;
pub mod types;

pub use data::GossipData;
pub use envelope::EnvelopeReader;
pub use error::{Error, Result};
pub use types::*;
