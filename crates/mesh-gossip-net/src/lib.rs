//! Gossip engine for mesh networks
//!
//! This crate provides:
//! - Per-channel gossip dispatch: unicast relay, tree broadcast and
//!   epidemic gossip
//! - Coalescing per-connection gossip senders
//! - The connection, local-peer and routing seams the engine consumes
//! - Length-prefixed framing and a stream-backed connection

pub mod channel;
pub mod connection;
pub mod framing;
pub mod gossiper;
pub mod peer;
pub mod registry;
pub mod routes;
pub mod sender;
pub mod stream;

pub use channel::{ChannelDispatch, GossipChannel, GossipError};
pub use connection::{Connection, ConnectionId, ConnectionRef, ConnectionSet, TransportEvent};
pub use framing::{FrameCodec, FrameError};
pub use gossiper::{Gossiper, SurrogateGossiper};
pub use peer::{LocalPeer, PeerTable};
pub use registry::ChannelRegistry;
pub use routes::{Routes, StaticRoutes};
pub use sender::GossipSender;
pub use stream::StreamConnection;
