//! Local peer identity and its live connections

use crate::connection::{ConnectionId, ConnectionRef, ConnectionSet};
use mesh_gossip_core::PeerName;
use parking_lot::RwLock;
use std::collections::HashMap;

/// The local node as seen by the gossip engine: its name and the
/// connections it currently owns.
pub trait LocalPeer: Send + Sync {
    /// Our peer name
    fn name(&self) -> PeerName;

    /// Connection to a given peer, if one is live
    fn connection_to(&self, peer: &PeerName) -> Option<ConnectionRef>;

    /// Snapshot of all live connections
    fn connections(&self) -> ConnectionSet;

    /// Live connections to any of the given peers
    fn connections_to(&self, peers: &[PeerName]) -> Vec<ConnectionRef> {
        peers
            .iter()
            .filter_map(|peer| self.connection_to(peer))
            .collect()
    }
}

/// In-memory connection registry, at most one connection per peer
pub struct PeerTable {
    /// Our peer name
    name: PeerName,
    /// Connected peers
    connections: RwLock<HashMap<PeerName, ConnectionRef>>,
}

impl PeerTable {
    /// Create an empty table
    pub fn new(name: PeerName) -> Self {
        Self {
            name,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection, replacing any previous one to the same peer
    pub fn add_connection(&self, conn: ConnectionRef) -> Option<ConnectionRef> {
        self.connections.write().insert(conn.remote_name(), conn)
    }

    /// Remove a connection by identity.
    ///
    /// A newer connection to the same peer is left alone.
    pub fn remove_connection(&self, id: ConnectionId) -> Option<ConnectionRef> {
        let mut connections = self.connections.write();
        let peer = connections
            .iter()
            .find(|(_, conn)| conn.id() == id)
            .map(|(peer, _)| *peer)?;
        connections.remove(&peer)
    }

    /// List connected peers
    pub fn connected_peers(&self) -> Vec<PeerName> {
        self.connections.read().keys().copied().collect()
    }

    /// Check if connected to a peer
    pub fn is_connected(&self, peer: &PeerName) -> bool {
        self.connections.read().contains_key(peer)
    }
}

impl LocalPeer for PeerTable {
    fn name(&self) -> PeerName {
        self.name
    }

    fn connection_to(&self, peer: &PeerName) -> Option<ConnectionRef> {
        self.connections.read().get(peer).cloned()
    }

    fn connections(&self) -> ConnectionSet {
        self.connections
            .read()
            .values()
            .map(|conn| (conn.id(), conn.clone()))
            .collect()
    }
}
