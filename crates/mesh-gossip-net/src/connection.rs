//! Connection seam consumed by the gossip engine
//!
//! A connection is an established, reliable, ordered link to one remote peer.
//! The engine only ever sends on it; reading is the transport's business.

use crate::framing::FrameError;
use async_trait::async_trait;
use mesh_gossip_core::{PeerName, ProtocolMsg};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Process-unique connection identity
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// An established connection to a remote peer
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identity of this connection
    fn id(&self) -> ConnectionId;

    /// Peer on the other end
    fn remote_name(&self) -> PeerName;

    /// Send a protocol message, waiting for room in the outbound path
    async fn send_protocol_msg(&self, msg: ProtocolMsg) -> Result<(), TransportError>;

    /// Send a protocol message if it can be accepted right now.
    ///
    /// Returns `false` when the outbound path is backlogged or closed; never
    /// waits.
    fn try_send_protocol_msg(&self, msg: ProtocolMsg) -> bool;
}

/// Shared handle to a connection
pub type ConnectionRef = Arc<dyn Connection>;

/// Set of connections keyed by identity
pub type ConnectionSet = HashMap<ConnectionId, ConnectionRef>;

/// Event from the transport layer
#[derive(Debug)]
pub enum TransportEvent {
    /// Protocol message received on a connection
    FrameReceived {
        connection: ConnectionId,
        from: PeerName,
        msg: ProtocolMsg,
    },
    /// Connection ended (end of stream or read error)
    Disconnected {
        connection: ConnectionId,
        peer: PeerName,
    },
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording connection for engine tests

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicBool;

    /// Records everything sent; can be told to refuse non-blocking sends.
    pub struct RecordingConnection {
        id: ConnectionId,
        remote: PeerName,
        accept_try_send: AtomicBool,
        /// Messages accepted by `send_protocol_msg`
        pub sent: Mutex<Vec<ProtocolMsg>>,
        /// Messages accepted by `try_send_protocol_msg`
        pub try_sent: Mutex<Vec<ProtocolMsg>>,
    }

    impl RecordingConnection {
        pub fn new(remote: PeerName) -> Arc<Self> {
            Arc::new(Self {
                id: ConnectionId::next(),
                remote,
                accept_try_send: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
                try_sent: Mutex::new(Vec::new()),
            })
        }

        pub fn set_backlogged(&self, backlogged: bool) {
            self.accept_try_send.store(!backlogged, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<ProtocolMsg> {
            self.sent.lock().clone()
        }

        pub fn try_sent(&self) -> Vec<ProtocolMsg> {
            self.try_sent.lock().clone()
        }

        /// Everything that left on this connection, in either path
        pub fn all_sent(&self) -> Vec<ProtocolMsg> {
            let mut all = self.try_sent();
            all.extend(self.sent());
            all
        }
    }

    #[async_trait]
    impl Connection for RecordingConnection {
        fn id(&self) -> ConnectionId {
            self.id
        }

        fn remote_name(&self) -> PeerName {
            self.remote
        }

        async fn send_protocol_msg(&self, msg: ProtocolMsg) -> Result<(), TransportError> {
            self.sent.lock().push(msg);
            Ok(())
        }

        fn try_send_protocol_msg(&self, msg: ProtocolMsg) -> bool {
            if !self.accept_try_send.load(Ordering::SeqCst) {
                return false;
            }
            self.try_sent.lock().push(msg);
            true
        }
    }

    #[test]
    fn test_connection_ids_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
