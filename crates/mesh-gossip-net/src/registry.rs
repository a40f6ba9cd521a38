//! Channel registry and inbound gossip dispatch

use crate::channel::{ChannelDispatch, GossipChannel, GossipError};
use crate::connection::ConnectionRef;
use crate::gossiper::{Gossiper, SurrogateGossiper};
use crate::peer::LocalPeer;
use crate::routes::Routes;
use mesh_gossip_core::{EnvelopeReader, PeerName, ProtocolTag};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::debug;

/// All gossip channels of one peer, keyed by name
pub struct ChannelRegistry {
    ourself: Arc<dyn LocalPeer>,
    routes: Arc<dyn Routes>,
    channels: RwLock<HashMap<String, Arc<dyn ChannelDispatch>>>,
}

impl ChannelRegistry {
    pub fn new(ourself: Arc<dyn LocalPeer>, routes: Arc<dyn Routes>) -> Self {
        Self {
            ourself,
            routes,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Our peer name
    pub fn our_name(&self) -> PeerName {
        self.ourself.name()
    }

    /// Register a gossiper under `name`
    pub fn new_gossip<G: Gossiper>(
        &self,
        name: &str,
        gossiper: Arc<G>,
    ) -> Result<Arc<GossipChannel<G>>, GossipError> {
        let channel = Arc::new(GossipChannel::new(
            name,
            self.ourself.clone(),
            self.routes.clone(),
            gossiper,
        ));

        let mut channels = self.channels.write();
        if channels.contains_key(name) {
            return Err(GossipError::DuplicateChannel(name.to_string()));
        }
        channels.insert(name.to_string(), channel.clone());
        Ok(channel)
    }

    /// Channel for `name`, created with a surrogate gossiper if unknown
    pub fn gossip_channel(&self, name: &str) -> Arc<dyn ChannelDispatch> {
        if let Some(channel) = self.channels.read().get(name) {
            return channel.clone();
        }

        self.channels
            .write()
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating surrogate gossip channel {}", name);
                let channel: Arc<dyn ChannelDispatch> = Arc::new(GossipChannel::new(
                    name,
                    self.ourself.clone(),
                    self.routes.clone(),
                    Arc::new(SurrogateGossiper),
                ));
                channel
            })
            .clone()
    }

    /// Names of all channels, registered or surrogate
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.read().keys().cloned().collect()
    }

    /// Dispatch one inbound gossip protocol message
    pub async fn handle_gossip(&self, tag: ProtocolTag, payload: &[u8]) -> Result<(), GossipError> {
        let mut reader = EnvelopeReader::new(payload);
        let channel = self.gossip_channel(reader.channel_name()?);
        let src = reader.peer()?;
        let body = reader.remaining();

        match tag {
            ProtocolTag::GossipUnicast => channel.deliver_unicast(src, payload, body).await,
            ProtocolTag::GossipBroadcast => channel.deliver_broadcast(src, body).await,
            ProtocolTag::Gossip => channel.deliver(src, body).await,
        }
    }

    /// Every channel gossips its full state to random neighbours
    pub fn send_all_gossip(&self) {
        for channel in self.snapshot() {
            channel.gossip();
        }
    }

    /// Every channel sends its full state down a new connection
    pub fn send_all_gossip_down(&self, conn: &ConnectionRef) {
        for channel in self.snapshot() {
            channel.gossip_down(conn);
        }
    }

    /// Spawn periodic gossip until `shutdown` fires
    pub fn spawn_gossip_timer(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.send_all_gossip();
                    }
                    _ = shutdown.recv() => {
                        break;
                    }
                }
            }
        })
    }

    fn snapshot(&self) -> Vec<Arc<dyn ChannelDispatch>> {
        self.channels.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::RecordingConnection;
    use crate::gossiper::testing::{Fragments, RecordingGossiper, Seen};
    use crate::peer::PeerTable;
    use crate::routes::StaticRoutes;
    use mesh_gossip_core::{envelope, ProtocolMsg};

    struct Node {
        peers: Arc<PeerTable>,
        routes: Arc<StaticRoutes>,
        registry: Arc<ChannelRegistry>,
    }

    fn node(name: PeerName) -> Node {
        let peers = Arc::new(PeerTable::new(name));
        let routes = Arc::new(StaticRoutes::new());
        let registry = Arc::new(ChannelRegistry::new(peers.clone(), routes.clone()));
        Node {
            peers,
            routes,
            registry,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    /// Hand everything `conn` sent to `to`, as the remote transport would
    async fn pump(conn: &RecordingConnection, to: &Node) {
        let msgs: Vec<ProtocolMsg> = conn.try_sent.lock().drain(..).collect();
        let more: Vec<ProtocolMsg> = conn.sent.lock().drain(..).collect();
        for msg in msgs.into_iter().chain(more) {
            to.registry.handle_gossip(msg.tag, &msg.payload).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_duplicate_channel_rejected() {
        let n = node(PeerName(1));
        n.registry
            .new_gossip("ch", Arc::new(RecordingGossiper::default()))
            .unwrap();
        let err = n
            .registry
            .new_gossip("ch", Arc::new(RecordingGossiper::default()))
            .unwrap_err();
        assert!(matches!(err, GossipError::DuplicateChannel(name) if name == "ch"));
    }

    #[tokio::test]
    async fn test_dispatch_by_tag() {
        let n = node(PeerName(1));
        let gossiper = Arc::new(RecordingGossiper::default());
        n.registry.new_gossip("ch", gossiper.clone()).unwrap();

        let unicast = envelope::encode_unicast("ch", PeerName(2), PeerName(1), b"u").unwrap();
        let broadcast = envelope::encode_broadcast("ch", PeerName(3), b"b").unwrap();
        let gossip = envelope::encode_gossip("ch", PeerName(2), b"g").unwrap();

        n.registry
            .handle_gossip(ProtocolTag::GossipUnicast, &unicast)
            .await
            .unwrap();
        n.registry
            .handle_gossip(ProtocolTag::GossipBroadcast, &broadcast)
            .await
            .unwrap();
        n.registry
            .handle_gossip(ProtocolTag::Gossip, &gossip)
            .await
            .unwrap();

        assert_eq!(
            gossiper.seen(),
            vec![
                Seen::Unicast(PeerName(2), b"u".to_vec()),
                Seen::Broadcast(PeerName(3), b"b".to_vec()),
                Seen::Gossip(b"g".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_decode_error() {
        let n = node(PeerName(1));
        n.registry
            .new_gossip("ch", Arc::new(RecordingGossiper::default()))
            .unwrap();

        let err = n
            .registry
            .handle_gossip(ProtocolTag::Gossip, &[0xff])
            .await
            .unwrap_err();
        assert!(matches!(err, GossipError::Envelope(_)));

        // valid header, payload missing
        let mut truncated = envelope::encode_gossip("ch", PeerName(2), b"abc").unwrap();
        truncated.truncate(truncated.len() - 4);
        let err = n
            .registry
            .handle_gossip(ProtocolTag::Gossip, &truncated)
            .await
            .unwrap_err();
        assert!(matches!(err, GossipError::Envelope(_)));
    }

    #[tokio::test]
    async fn test_unknown_channel_is_created_not_rejected() {
        let n = node(PeerName(1));
        let gossip = envelope::encode_gossip("mystery", PeerName(2), b"?").unwrap();

        n.registry
            .handle_gossip(ProtocolTag::Gossip, &gossip)
            .await
            .unwrap();
        assert_eq!(n.registry.channel_names(), vec!["mystery".to_string()]);

        // later registration under that name is a duplicate
        assert!(n
            .registry
            .new_gossip("mystery", Arc::new(RecordingGossiper::default()))
            .is_err());
    }

    #[tokio::test]
    async fn test_surrogate_channel_relays_broadcasts() {
        let n = node(PeerName(2));
        let conn = RecordingConnection::new(PeerName(3));
        n.peers.add_connection(conn.clone());
        n.routes.set_broadcast(PeerName(1), vec![PeerName(3)]);

        let orig = envelope::encode_broadcast("elsewhere", PeerName(1), b"opaque").unwrap();
        n.registry
            .handle_gossip(ProtocolTag::GossipBroadcast, &orig)
            .await
            .unwrap();

        let sent = conn.try_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload, orig);
    }

    #[tokio::test]
    async fn test_send_all_gossip_down_primes_connection() {
        let n = node(PeerName(1));
        n.registry
            .new_gossip("ch", Arc::new(RecordingGossiper::default()))
            .unwrap();
        let conn = RecordingConnection::new(PeerName(2));
        n.peers.add_connection(conn.clone());

        let conn_ref: ConnectionRef = conn.clone();
        n.registry.send_all_gossip_down(&conn_ref);
        settle().await;

        let sent = conn.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].tag, ProtocolTag::Gossip);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gossip_timer_ticks_until_shutdown() {
        let n = node(PeerName(1));
        n.registry
            .new_gossip("ch", Arc::new(RecordingGossiper::default()))
            .unwrap();
        let conn = RecordingConnection::new(PeerName(2));
        n.peers.add_connection(conn.clone());
        n.routes.set_neighbours(vec![PeerName(2)]);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = n
            .registry
            .clone()
            .spawn_gossip_timer(Duration::from_millis(100), shutdown_rx);

        tokio::time::sleep(Duration::from_millis(250)).await;
        settle().await;
        assert!(!conn.sent().is_empty());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    /// A - B - C in a line; A broadcasts, C accepts and stops propagation.
    #[tokio::test]
    async fn test_broadcast_across_three_peers() {
        let (a, b, c) = (PeerName(1), PeerName(2), PeerName(3));
        let node_a = node(a);
        let node_b = node(b);
        let node_c = node(c);

        let gossiper_a = Arc::new(RecordingGossiper::default());
        let gossiper_b = Arc::new(RecordingGossiper::default());
        let gossiper_c = Arc::new(RecordingGossiper::default());
        let channel_a = node_a.registry.new_gossip("ch", gossiper_a.clone()).unwrap();
        node_b.registry.new_gossip("ch", gossiper_b.clone()).unwrap();
        node_c.registry.new_gossip("ch", gossiper_c.clone()).unwrap();

        // B relays whatever it hears; C keeps it
        *gossiper_b.broadcast_reply.lock() = Some(Fragments::one(b"D"));

        let a_to_b = RecordingConnection::new(b);
        let b_to_a = RecordingConnection::new(a);
        let b_to_c = RecordingConnection::new(c);
        let c_to_b = RecordingConnection::new(b);
        node_a.peers.add_connection(a_to_b.clone());
        node_b.peers.add_connection(b_to_a.clone());
        node_b.peers.add_connection(b_to_c.clone());
        node_c.peers.add_connection(c_to_b.clone());

        node_a.routes.set_broadcast(a, vec![b]);
        node_b.routes.set_broadcast(a, vec![c]);
        node_c.routes.set_broadcast(a, vec![]);

        channel_a.gossip_broadcast(Fragments::one(b"D")).unwrap();
        pump(&a_to_b, &node_b).await;
        pump(&b_to_c, &node_c).await;
        settle().await;

        assert_eq!(gossiper_b.seen(), vec![Seen::Broadcast(a, b"D".to_vec())]);
        assert_eq!(gossiper_c.seen(), vec![Seen::Broadcast(a, b"D".to_vec())]);
        assert!(b_to_a.all_sent().is_empty());
        assert!(c_to_b.all_sent().is_empty());
        assert!(gossiper_a.seen().is_empty());
    }

    /// A unicasts to C through B; C sees the exact payload bytes.
    #[tokio::test]
    async fn test_unicast_relayed_across_three_peers() {
        let (a, b, c) = (PeerName(1), PeerName(2), PeerName(3));
        let node_a = node(a);
        let node_b = node(b);
        let node_c = node(c);

        let gossiper_b = Arc::new(RecordingGossiper::default());
        let gossiper_c = Arc::new(RecordingGossiper::default());
        let channel_a = node_a
            .registry
            .new_gossip("ch", Arc::new(RecordingGossiper::default()))
            .unwrap();
        node_b.registry.new_gossip("ch", gossiper_b.clone()).unwrap();
        node_c.registry.new_gossip("ch", gossiper_c.clone()).unwrap();

        let a_to_b = RecordingConnection::new(b);
        let b_to_c = RecordingConnection::new(c);
        node_a.peers.add_connection(a_to_b.clone());
        node_b.peers.add_connection(b_to_c.clone());
        node_a.routes.set_unicast(c, b);
        node_b.routes.set_unicast(c, c);

        let payload = vec![0u8, 1, 2, 254, 255];
        channel_a.gossip_unicast(c, &payload).await.unwrap();
        pump(&a_to_b, &node_b).await;
        pump(&b_to_c, &node_c).await;

        assert!(gossiper_b.seen().is_empty());
        assert_eq!(gossiper_c.seen(), vec![Seen::Unicast(a, payload)]);
    }
}
