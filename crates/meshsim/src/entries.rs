//! Grow-only set of strings gossiped across the mesh

use mesh_gossip_core::{GossipData, PeerName};
use mesh_gossip_net::Gossiper;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use tracing::{debug, error, info};

/// Entries per encoded fragment
const FRAGMENT_ENTRIES: usize = 256;

/// Mergeable set of entries
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntrySet(pub BTreeSet<String>);

impl EntrySet {
    pub fn single(entry: impl Into<String>) -> Self {
        Self(BTreeSet::from([entry.into()]))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode one fragment
    pub fn decode(fragment: &[u8]) -> Result<Self, postcard::Error> {
        let entries: Vec<String> = postcard::from_bytes(fragment)?;
        Ok(Self(entries.into_iter().collect()))
    }
}

impl GossipData for EntrySet {
    fn encode(&self) -> Vec<Vec<u8>> {
        let entries: Vec<&String> = self.0.iter().collect();
        entries
            .chunks(FRAGMENT_ENTRIES)
            .filter_map(|chunk| match postcard::to_allocvec(&chunk) {
                Ok(fragment) => Some(fragment),
                Err(e) => {
                    error!("Dropping {} entries that failed to encode: {}", chunk.len(), e);
                    None
                }
            })
            .collect()
    }

    fn merge(&mut self, other: Self) {
        self.0.extend(other.0);
    }
}

/// Gossiper owning an [`EntrySet`] plus an inbox of unicast messages
#[derive(Default)]
pub struct EntryGossiper {
    state: Mutex<EntrySet>,
    inbox: Mutex<Vec<(PeerName, String)>>,
}

impl EntryGossiper {
    pub fn new(initial: EntrySet) -> Self {
        Self {
            state: Mutex::new(initial),
            inbox: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the current entries
    pub fn entries(&self) -> EntrySet {
        self.state.lock().clone()
    }

    /// Unicast messages received so far
    pub fn inbox(&self) -> Vec<(PeerName, String)> {
        self.inbox.lock().clone()
    }

    /// Merge `incoming` and return the entries that were new to us
    fn absorb(&self, incoming: EntrySet) -> EntrySet {
        let mut state = self.state.lock();
        let fresh: BTreeSet<String> = incoming.0.difference(&state.0).cloned().collect();
        state.0.extend(fresh.iter().cloned());
        EntrySet(fresh)
    }
}

impl Gossiper for EntryGossiper {
    type Data = EntrySet;

    fn on_gossip_unicast(&self, src: PeerName, msg: &[u8]) -> anyhow::Result<()> {
        let text = std::str::from_utf8(msg)?.to_string();
        info!("Unicast from {}: {}", src, text);
        self.inbox.lock().push((src, text));
        Ok(())
    }

    fn on_gossip_broadcast(
        &self,
        src: PeerName,
        update: &[u8],
    ) -> anyhow::Result<Option<EntrySet>> {
        let fresh = self.absorb(EntrySet::decode(update)?);
        debug!("Broadcast from {} carried {} new entries", src, fresh.len());
        Ok((!fresh.is_empty()).then_some(fresh))
    }

    fn on_gossip(&self, update: &[u8]) -> anyhow::Result<Option<EntrySet>> {
        let incoming = EntrySet::decode(update)?;
        if !self.absorb(incoming.clone()).is_empty() {
            return Ok(None);
        }

        // sender is behind us: answer with whatever it is missing
        let state = self.state.lock();
        let missing: BTreeSet<String> = state.0.difference(&incoming.0).cloned().collect();
        Ok((!missing.is_empty()).then_some(EntrySet(missing)))
    }

    fn gossip(&self) -> Option<EntrySet> {
        let state = self.state.lock();
        (!state.is_empty()).then(|| state.clone())
    }
}
