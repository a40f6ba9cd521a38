//! Gossip channel - the per-namespace protocol engine
//!
//! A channel dispatches decoded envelopes to its gossiper and relays what the
//! gossiper hands back: unicast hop by hop, broadcast along the source's tree,
//! and epidemic gossip through per-connection senders.
//!
//! Locking: the sender table has one lock, held only for table bookkeeping.
//! Route and connection lookups happen before it is taken, so it never nests
//! inside the routing or connection-ownership locks.

use crate::connection::{ConnectionId, ConnectionRef, ConnectionSet, TransportError};
use crate::gossiper::Gossiper;
use crate::peer::LocalPeer;
use crate::routes::Routes;
use crate::sender::GossipSender;
use async_trait::async_trait;
use mesh_gossip_core::{
    envelope, EnvelopeReader, GossipData, PeerName, ProtocolMsg, ProtocolTag,
    MAX_FEASIBLE_MESSAGE_LEN,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Sender-table entries examined per GC pass
pub const GC_SCAN_LIMIT: usize = 8;

/// Gossip channel errors
#[derive(Debug, Error)]
pub enum GossipError {
    #[error("envelope error: {0}")]
    Envelope(#[from] mesh_gossip_core::Error),
    #[error("unknown relay destination: {0}")]
    UnknownRelayDestination(PeerName),
    #[error("unable to find connection to relay peer {0}")]
    NoRelayConnection(PeerName),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("gossiper error: {0}")]
    Gossiper(#[from] anyhow::Error),
    #[error("duplicate channel {0}")]
    DuplicateChannel(String),
}

/// Type-erased inbound side of a channel, used by the dispatch layer
#[async_trait]
pub trait ChannelDispatch: Send + Sync {
    /// Channel name
    fn name(&self) -> &str;

    /// Handle a unicast. `orig` is the whole envelope as received, `body` the
    /// part after channel name and source.
    async fn deliver_unicast(
        &self,
        src: PeerName,
        orig: &[u8],
        body: &[u8],
    ) -> Result<(), GossipError>;

    /// Handle a broadcast rooted at `src`
    async fn deliver_broadcast(&self, src: PeerName, body: &[u8]) -> Result<(), GossipError>;

    /// Handle epidemic gossip sent by `src`
    async fn deliver(&self, src: PeerName, body: &[u8]) -> Result<(), GossipError>;

    /// Send the gossiper's full state to random neighbours
    fn gossip(&self);

    /// Send the gossiper's full state down one connection
    fn gossip_down(&self, conn: &ConnectionRef);
}

/// Connection senders plus the GC cursor
struct SenderTable<D: GossipData> {
    senders: BTreeMap<ConnectionId, GossipSender<D>>,
    cursor: Option<ConnectionId>,
}

impl<D: GossipData> SenderTable<D> {
    fn new() -> Self {
        Self {
            senders: BTreeMap::new(),
            cursor: None,
        }
    }

    /// Stop and remove senders whose connection is gone.
    ///
    /// Looks at up to GC_SCAN_LIMIT entries round-robin from the cursor and
    /// stops at the first live one. Garbage missed now is found later.
    fn collect_garbage(&mut self, live: &ConnectionSet) {
        let after = match self.cursor {
            Some(cursor) => (Bound::Excluded(cursor), Bound::Unbounded),
            None => (Bound::Unbounded, Bound::Unbounded),
        };
        let wrapped = match self.cursor {
            Some(cursor) => (Bound::Unbounded, Bound::Included(cursor)),
            None => (Bound::Unbounded, Bound::Excluded(ConnectionId(0))),
        };
        let candidates: Vec<ConnectionId> = self
            .senders
            .range(after)
            .chain(self.senders.range(wrapped))
            .map(|(id, _)| *id)
            .take(GC_SCAN_LIMIT)
            .collect();

        for id in candidates {
            self.cursor = Some(id);
            if live.contains_key(&id) {
                return;
            }
            if let Some(sender) = self.senders.remove(&id) {
                debug!("Removing gossip sender for dead {}", id);
                sender.stop();
            }
        }
    }
}

/// Per-channel gossip engine
pub struct GossipChannel<G: Gossiper> {
    name: Arc<str>,
    ourself: Arc<dyn LocalPeer>,
    routes: Arc<dyn Routes>,
    gossiper: Arc<G>,
    max_message_len: usize,
    senders: Mutex<SenderTable<G::Data>>,
}

impl<G: Gossiper> fmt::Debug for GossipChannel<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GossipChannel")
            .field("name", &self.name)
            .field("ourself", &self.ourself.name())
            .field("max_message_len", &self.max_message_len)
            .field("senders", &self.sender_count())
            .finish_non_exhaustive()
    }
}

impl<G: Gossiper> GossipChannel<G> {
    /// Create a channel
    pub fn new(
        name: impl Into<Arc<str>>,
        ourself: Arc<dyn LocalPeer>,
        routes: Arc<dyn Routes>,
        gossiper: Arc<G>,
    ) -> Self {
        Self {
            name: name.into(),
            ourself,
            routes,
            gossiper,
            max_message_len: MAX_FEASIBLE_MESSAGE_LEN,
            senders: Mutex::new(SenderTable::new()),
        }
    }

    /// Set the largest gossip fragment senders will transmit
    pub fn with_max_message_len(mut self, max_message_len: usize) -> Self {
        self.max_message_len = max_message_len;
        self
    }

    /// Number of live sender table entries
    pub fn sender_count(&self) -> usize {
        self.senders.lock().senders.len()
    }

    /// Send `msg` to `dest`, relaying through the mesh as needed
    pub async fn gossip_unicast(&self, dest: PeerName, msg: &[u8]) -> Result<(), GossipError> {
        let buf = envelope::encode_unicast(&self.name, self.ourself.name(), dest, msg)?;
        self.relay_unicast(dest, buf).await
    }

    /// Broadcast `update` to the whole mesh, rooted at ourselves
    ///
    /// # Panics
    ///
    /// Panics outside a tokio runtime if a blocked connection needs a new
    /// gossip sender task.
    pub fn gossip_broadcast(&self, update: G::Data) -> Result<(), GossipError> {
        self.relay_broadcast(self.ourself.name(), update)
    }

    /// Send `data` to a random set of neighbours, never to `src`
    ///
    /// # Panics
    ///
    /// Panics outside a tokio runtime when a new gossip sender task has to be
    /// spawned.
    pub fn send(&self, src: PeerName, data: G::Data) {
        // outside the sender lock so route recalculation never nests in it
        self.routes.ensure_recalculated();
        let selected: ConnectionSet = self
            .routes
            .random_neighbours(&src)
            .iter()
            .filter_map(|name| self.ourself.connection_to(name))
            .map(|conn| (conn.id(), conn))
            .collect();
        self.send_down_set(selected, data);
    }

    /// Send `data` on one specific connection
    ///
    /// # Panics
    ///
    /// Panics outside a tokio runtime when a new gossip sender task has to be
    /// spawned.
    pub fn send_down(&self, conn: &ConnectionRef, data: G::Data) {
        let selected = ConnectionSet::from([(conn.id(), conn.clone())]);
        self.send_down_set(selected, data);
    }

    async fn relay_unicast(&self, dest: PeerName, buf: Vec<u8>) -> Result<(), GossipError> {
        let relay = self
            .routes
            .unicast_all(&dest)
            .ok_or(GossipError::UnknownRelayDestination(dest))?;
        let conn = self
            .ourself
            .connection_to(&relay)
            .ok_or(GossipError::NoRelayConnection(relay))?;
        conn.send_protocol_msg(ProtocolMsg::new(ProtocolTag::GossipUnicast, buf))
            .await?;
        Ok(())
    }

    fn relay_broadcast(&self, src: PeerName, update: G::Data) -> Result<(), GossipError> {
        self.routes.ensure_recalculated();
        let next_hops = self.routes.broadcast_all(&src);
        if next_hops.is_empty() {
            return Ok(());
        }

        let connections = self.ourself.connections_to(&next_hops);
        let mut blocked = ConnectionSet::new();
        for fragment in update.encode() {
            let payload = envelope::encode_broadcast(&self.name, src, &fragment)?;
            let msg = ProtocolMsg::new(ProtocolTag::GossipBroadcast, payload);
            for conn in &connections {
                if !conn.try_send_protocol_msg(msg.clone()) {
                    blocked.insert(conn.id(), conn.clone());
                }
            }
        }

        // Better to deliver a broadcast as ordinary gossip than to lose it.
        if !blocked.is_empty() {
            debug!(
                "[gossip {}]: {} blocked connections for broadcast from {}",
                self.name,
                blocked.len(),
                src
            );
        }
        self.send_down_set(blocked, update);
        Ok(())
    }

    fn send_down_set(&self, selected: ConnectionSet, data: G::Data) {
        if selected.is_empty() {
            return;
        }
        let live = self.ourself.connections();

        let mut table = self.senders.lock();
        table.collect_garbage(&live);
        for (id, conn) in selected {
            let sender = table
                .senders
                .entry(id)
                .or_insert_with(|| self.make_sender(conn));
            sender.send(data.clone());
        }
    }

    fn make_sender(&self, conn: ConnectionRef) -> GossipSender<G::Data> {
        debug!(
            "[gossip {}]: starting sender for {} ({})",
            self.name,
            conn.remote_name(),
            conn.id()
        );
        GossipSender::spawn(
            conn,
            self.name.clone(),
            self.ourself.name(),
            self.max_message_len,
        )
    }
}

#[async_trait]
impl<G: Gossiper> ChannelDispatch for GossipChannel<G> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver_unicast(
        &self,
        src: PeerName,
        orig: &[u8],
        body: &[u8],
    ) -> Result<(), GossipError> {
        let mut reader = EnvelopeReader::new(body);
        let dest = reader.peer()?;
        if dest != self.ourself.name() {
            // A problem between us and the destination is no reason to fail
            // the link from the source.
            if let Err(e) = self.relay_unicast(dest, orig.to_vec()).await {
                warn!("[gossip {}]: unicast relay from {} failed: {}", self.name, src, e);
            }
            return Ok(());
        }
        let payload = reader.payload()?;
        self.gossiper.on_gossip_unicast(src, payload)?;
        Ok(())
    }

    async fn deliver_broadcast(&self, src: PeerName, body: &[u8]) -> Result<(), GossipError> {
        let payload = EnvelopeReader::new(body).payload()?;
        match self.gossiper.on_gossip_broadcast(src, payload)? {
            Some(data) => self.relay_broadcast(src, data),
            None => Ok(()),
        }
    }

    async fn deliver(&self, src: PeerName, body: &[u8]) -> Result<(), GossipError> {
        let payload = EnvelopeReader::new(body).payload()?;
        if let Some(delta) = self.gossiper.on_gossip(payload)? {
            match self.ourself.connection_to(&src) {
                Some(conn) => self.send_down(&conn, delta),
                None => debug!(
                    "[gossip {}]: no connection to {} for gossip reply",
                    self.name, src
                ),
            }
        }
        Ok(())
    }

    fn gossip(&self) {
        if let Some(data) = self.gossiper.gossip() {
            self.send(self.ourself.name(), data);
        }
    }

    fn gossip_down(&self, conn: &ConnectionRef) {
        if let Some(data) = self.gossiper.gossip() {
            self.send_down(conn, data);
        }
    }
}
