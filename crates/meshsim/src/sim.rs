//! meshsim simulation - a line of peers over in-memory streams

use crate::config::Config;
use crate::entries::{EntryGossiper, EntrySet};
use mesh_gossip_core::PeerName;
use mesh_gossip_net::{
    ChannelRegistry, ConnectionRef, GossipChannel, GossipError, PeerTable, StaticRoutes,
    StreamConnection, TransportEvent,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bytes buffered in each direction of an in-memory link
const LINK_BUFFER_BYTES: usize = 64 * 1024;

/// How often convergence is checked
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Simulation errors
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Gossip error: {0}")]
    Gossip(#[from] GossipError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] anyhow::Error),
}

/// One simulated peer
pub struct SimNode {
    pub name: PeerName,
    pub peers: Arc<PeerTable>,
    pub routes: Arc<StaticRoutes>,
    pub registry: Arc<ChannelRegistry>,
    pub channel: Arc<GossipChannel<EntryGossiper>>,
    pub gossiper: Arc<EntryGossiper>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl SimNode {
    fn new(name: PeerName, channel_name: &str) -> Result<Self, SimError> {
        let peers = Arc::new(PeerTable::new(name));
        let routes = Arc::new(StaticRoutes::new());
        let registry = Arc::new(ChannelRegistry::new(peers.clone(), routes.clone()));
        let gossiper = Arc::new(EntryGossiper::new(EntrySet::single(entry_for(name))));
        let channel = registry.new_gossip(channel_name, gossiper.clone())?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            name,
            peers,
            routes,
            registry,
            channel,
            gossiper,
            events_tx,
            events_rx: Some(events_rx),
        })
    }
}

/// Outcome of a simulation run
#[derive(Debug, Clone)]
pub struct SimReport {
    pub peers: usize,
    pub converged: bool,
    pub unicast_delivered: bool,
    pub elapsed: Duration,
    /// Entry count per peer at the end of the run
    pub entry_counts: Vec<usize>,
}

/// Simulation state
pub struct Simulation {
    config: Config,
    nodes: Vec<SimNode>,
    links: Vec<Arc<StreamConnection>>,
    /// Shutdown signal
    shutdown_tx: broadcast::Sender<()>,
}

impl Simulation {
    /// Create the peers; nothing is connected yet
    pub fn new(config: Config) -> Result<Self, SimError> {
        config.validate()?;

        let nodes = (1..=config.peers as u64)
            .map(|n| SimNode::new(PeerName(n), &config.channel))
            .collect::<Result<Vec<_>, _>>()?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            nodes,
            links: Vec::new(),
            shutdown_tx,
        })
    }

    /// Peers in line order
    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    /// Run the simulation to convergence or timeout
    pub async fn run(mut self) -> Result<SimReport, SimError> {
        info!(
            "Starting {} peers on channel '{}'",
            self.nodes.len(),
            self.config.channel
        );
        let started = Instant::now();

        self.install_routes();
        let dispatchers = self.spawn_dispatchers();
        self.connect_line();

        for node in &self.nodes {
            node.channel
                .gossip_broadcast(EntrySet::single(entry_for(node.name)))?;
        }

        let timers: Vec<JoinHandle<()>> = self
            .nodes
            .iter()
            .map(|node| {
                node.registry
                    .clone()
                    .spawn_gossip_timer(self.config.gossip_interval(), self.shutdown_tx.subscribe())
            })
            .collect();

        let (first, last) = (&self.nodes[0], &self.nodes[self.nodes.len() - 1]);
        let greeting = format!("hello from {}", first.name);
        first
            .channel
            .gossip_unicast(last.name, greeting.as_bytes())
            .await?;

        let deadline = started + self.config.timeout();
        let converged = loop {
            if self.is_converged() {
                break true;
            }
            if Instant::now() >= deadline {
                break false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        };

        let report = SimReport {
            peers: self.nodes.len(),
            converged,
            unicast_delivered: !last.gossiper.inbox().is_empty(),
            elapsed: started.elapsed(),
            entry_counts: self.nodes.iter().map(|n| n.gossiper.entries().len()).collect(),
        };

        self.shutdown();
        for handle in timers.into_iter().chain(dispatchers) {
            let _ = handle.await;
        }

        Ok(report)
    }

    /// Every peer holds every entry and the unicast arrived
    pub fn is_converged(&self) -> bool {
        let n = self.nodes.len();
        let last = &self.nodes[n - 1];
        self.nodes.iter().all(|node| node.gossiper.entries().len() == n)
            && !last.gossiper.inbox().is_empty()
    }

    /// Stop timers and dispatch loops and close every link
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        for link in &self.links {
            link.close();
        }
    }

    /// Routing tables for a line: everything left goes left, right goes right
    fn install_routes(&self) {
        let names: Vec<PeerName> = self.nodes.iter().map(|n| n.name).collect();
        for (i, node) in self.nodes.iter().enumerate() {
            let left = i.checked_sub(1).map(|j| names[j]);
            let right = names.get(i + 1).copied();

            node.routes
                .set_neighbours(left.into_iter().chain(right).collect());

            for (j, other) in names.iter().enumerate() {
                let hops: Vec<PeerName> = if j < i {
                    node.routes.set_unicast(*other, names[i - 1]);
                    right.into_iter().collect()
                } else if j > i {
                    node.routes.set_unicast(*other, names[i + 1]);
                    left.into_iter().collect()
                } else {
                    left.into_iter().chain(right).collect()
                };
                node.routes.set_broadcast(*other, hops);
            }
        }
    }

    fn connect_line(&mut self) {
        for i in 0..self.nodes.len() - 1 {
            let (left_end, right_end) = tokio::io::duplex(LINK_BUFFER_BYTES);
            let (left, right) = (&self.nodes[i], &self.nodes[i + 1]);

            let to_right = StreamConnection::spawn(
                right.name,
                left_end,
                self.config.queue_depth,
                left.events_tx.clone(),
            );
            let to_left = StreamConnection::spawn(
                left.name,
                right_end,
                self.config.queue_depth,
                right.events_tx.clone(),
            );

            left.peers.add_connection(to_right.clone());
            right.peers.add_connection(to_left.clone());

            let to_right_ref: ConnectionRef = to_right.clone();
            let to_left_ref: ConnectionRef = to_left.clone();
            left.registry.send_all_gossip_down(&to_right_ref);
            right.registry.send_all_gossip_down(&to_left_ref);

            debug!("Linked {} <-> {}", left.name, right.name);
            self.links.push(to_right);
            self.links.push(to_left);
        }
    }

    fn spawn_dispatchers(&mut self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for node in &mut self.nodes {
            let Some(events) = node.events_rx.take() else {
                continue;
            };
            handles.push(spawn_dispatch(
                node.registry.clone(),
                node.peers.clone(),
                node.routes.clone(),
                events,
                self.shutdown_tx.subscribe(),
            ));
        }
        handles
    }
}

/// Feed one peer's transport events into its channel registry
fn spawn_dispatch(
    registry: Arc<ChannelRegistry>,
    peers: Arc<PeerTable>,
    routes: Arc<StaticRoutes>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::FrameReceived { from, msg, .. }) => {
                        if let Err(e) = registry.handle_gossip(msg.tag, &msg.payload).await {
                            warn!("{}: gossip from {} rejected: {}", registry.our_name(), from, e);
                        }
                    }
                    Some(TransportEvent::Disconnected { connection, peer }) => {
                        if peers.remove_connection(connection).is_some() {
                            info!("{}: lost connection to {}", registry.our_name(), peer);
                            routes.set_neighbours(peers.connected_peers());
                        }
                    }
                    None => break,
                },
                _ = shutdown.recv() => {
                    break;
                }
            }
        }
    })
}

fn entry_for(name: PeerName) -> String {
    format!("peer-{}", name)
}
