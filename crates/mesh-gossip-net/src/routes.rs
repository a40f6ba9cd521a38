//! Routing oracle seam
//!
//! The engine never computes routes; it asks an oracle for next hops.

use mesh_gossip_core::PeerName;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Next-hop queries over the current mesh topology
pub trait Routes: Send + Sync {
    /// Recompute routes if the topology changed since the last computation
    fn ensure_recalculated(&self);

    /// Next-hop peer towards `dest`, via any connection
    fn unicast_all(&self, dest: &PeerName) -> Option<PeerName>;

    /// Next-hop peers for a broadcast rooted at `src`
    fn broadcast_all(&self, src: &PeerName) -> Vec<PeerName>;

    /// A random subset of neighbours, never including `except`
    fn random_neighbours(&self, except: &PeerName) -> Vec<PeerName>;
}

/// Routing tables supplied wholesale by the embedder
#[derive(Default)]
pub struct StaticRoutes {
    unicast: RwLock<HashMap<PeerName, PeerName>>,
    broadcast: RwLock<HashMap<PeerName, Vec<PeerName>>>,
    neighbours: RwLock<Vec<PeerName>>,
    stale: AtomicBool,
    recalculations: AtomicU64,
}

impl StaticRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route unicast traffic for `dest` via `next_hop`
    pub fn set_unicast(&self, dest: PeerName, next_hop: PeerName) {
        self.unicast.write().insert(dest, next_hop);
        self.stale.store(true, Ordering::Release);
    }

    /// Set the next hops of the broadcast tree rooted at `src`
    pub fn set_broadcast(&self, src: PeerName, next_hops: Vec<PeerName>) {
        self.broadcast.write().insert(src, next_hops);
        self.stale.store(true, Ordering::Release);
    }

    /// Set the directly connected neighbours
    pub fn set_neighbours(&self, neighbours: Vec<PeerName>) {
        *self.neighbours.write() = neighbours;
        self.stale.store(true, Ordering::Release);
    }

    /// How many times stale tables were recalculated
    pub fn recalculations(&self) -> u64 {
        self.recalculations.load(Ordering::Acquire)
    }
}

impl Routes for StaticRoutes {
    fn ensure_recalculated(&self) {
        if self.stale.swap(false, Ordering::AcqRel) {
            self.recalculations.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn unicast_all(&self, dest: &PeerName) -> Option<PeerName> {
        self.unicast.read().get(dest).copied()
    }

    fn broadcast_all(&self, src: &PeerName) -> Vec<PeerName> {
        self.broadcast
            .read()
            .get(src)
            .map(|hops| hops.iter().filter(|hop| *hop != src).copied().collect())
            .unwrap_or_default()
    }

    fn random_neighbours(&self, except: &PeerName) -> Vec<PeerName> {
        let candidates: Vec<PeerName> = self
            .neighbours
            .read()
            .iter()
            .filter(|peer| *peer != except)
            .copied()
            .collect();

        // roughly log2 of the candidate count, at least one
        let count = (usize::BITS - candidates.len().leading_zeros()) as usize;
        candidates
            .choose_multiple(&mut rand::thread_rng(), count.min(candidates.len()))
            .copied()
            .collect()
    }
}
