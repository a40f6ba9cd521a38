//! Application-side gossip callbacks

use mesh_gossip_core::{GossipData, PeerName};
use tracing::debug;

/// Domain state owner for one channel.
///
/// Callbacks run on the dispatch path of whichever connection delivered the
/// message, possibly concurrently.
pub trait Gossiper: Send + Sync + 'static {
    /// Mergeable state this gossiper produces
    type Data: GossipData;

    /// A unicast addressed to us arrived
    fn on_gossip_unicast(&self, src: PeerName, msg: &[u8]) -> anyhow::Result<()>;

    /// A broadcast from `src` arrived. Return the data to keep propagating
    /// along the broadcast tree, or `None` to stop here.
    fn on_gossip_broadcast(
        &self,
        src: PeerName,
        update: &[u8],
    ) -> anyhow::Result<Option<Self::Data>>;

    /// Epidemic gossip arrived. Return a delta to send straight back to the
    /// sender, or `None`.
    fn on_gossip(&self, update: &[u8]) -> anyhow::Result<Option<Self::Data>>;

    /// Full local state for periodic gossip, if there is any
    fn gossip(&self) -> Option<Self::Data>;
}

/// Raw fragments carried on behalf of a channel we do not run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SurrogateData {
    messages: Vec<Vec<u8>>,
}

impl SurrogateData {
    pub fn new(update: &[u8]) -> Self {
        Self {
            messages: vec![update.to_vec()],
        }
    }
}

impl GossipData for SurrogateData {
    fn encode(&self) -> Vec<Vec<u8>> {
        self.messages.clone()
    }

    fn merge(&mut self, other: Self) {
        self.messages.extend(other.messages);
    }
}

/// Stand-in for channels with no registered gossiper.
///
/// Keeps broadcast trees intact by relaying broadcasts untouched; everything
/// else is dropped.
#[derive(Debug, Default)]
pub struct SurrogateGossiper;

impl Gossiper for SurrogateGossiper {
    type Data = SurrogateData;

    fn on_gossip_unicast(&self, src: PeerName, msg: &[u8]) -> anyhow::Result<()> {
        debug!("Dropping {} byte unicast from {} on unknown channel", msg.len(), src);
        Ok(())
    }

    fn on_gossip_broadcast(
        &self,
        _src: PeerName,
        update: &[u8],
    ) -> anyhow::Result<Option<SurrogateData>> {
        Ok(Some(SurrogateData::new(update)))
    }

    fn on_gossip(&self, _update: &[u8]) -> anyhow::Result<Option<SurrogateData>> {
        Ok(None)
    }

    fn gossip(&self) -> Option<SurrogateData> {
        None
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording gossiper for engine tests

    use super::*;
    use parking_lot::Mutex;

    /// Byte-list data; merge concatenates
    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct Fragments(pub Vec<Vec<u8>>);

    impl Fragments {
        pub fn one(bytes: &[u8]) -> Self {
            Self(vec![bytes.to_vec()])
        }
    }

    impl GossipData for Fragments {
        fn encode(&self) -> Vec<Vec<u8>> {
            self.0.clone()
        }

        fn merge(&mut self, other: Self) {
            self.0.extend(other.0);
        }
    }

    /// What the recording gossiper saw
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Seen {
        Unicast(PeerName, Vec<u8>),
        Broadcast(PeerName, Vec<u8>),
        Gossip(Vec<u8>),
    }

    /// Records callbacks and replies with preset answers
    #[derive(Default)]
    pub struct RecordingGossiper {
        pub seen: Mutex<Vec<Seen>>,
        pub broadcast_reply: Mutex<Option<Fragments>>,
        pub gossip_reply: Mutex<Option<Fragments>>,
        pub fail: Mutex<bool>,
    }

    impl RecordingGossiper {
        pub fn seen(&self) -> Vec<Seen> {
            self.seen.lock().clone()
        }

        fn check(&self) -> anyhow::Result<()> {
            if *self.fail.lock() {
                anyhow::bail!("rejected update");
            }
            Ok(())
        }
    }

    impl Gossiper for RecordingGossiper {
        type Data = Fragments;

        fn on_gossip_unicast(&self, src: PeerName, msg: &[u8]) -> anyhow::Result<()> {
            self.seen.lock().push(Seen::Unicast(src, msg.to_vec()));
            self.check()
        }

        fn on_gossip_broadcast(
            &self,
            src: PeerName,
            update: &[u8],
        ) -> anyhow::Result<Option<Fragments>> {
            self.seen.lock().push(Seen::Broadcast(src, update.to_vec()));
            self.check()?;
            Ok(self.broadcast_reply.lock().clone())
        }

        fn on_gossip(&self, update: &[u8]) -> anyhow::Result<Option<Fragments>> {
            self.seen.lock().push(Seen::Gossip(update.to_vec()));
            self.check()?;
            Ok(self.gossip_reply.lock().clone())
        }

        fn gossip(&self) -> Option<Fragments> {
            Some(Fragments::one(b"full-state"))
        }
    }

    #[test]
    fn test_surrogate_relays_broadcasts_only() {
        let surrogate = SurrogateGossiper;
        let relayed = surrogate
            .on_gossip_broadcast(PeerName(1), b"opaque")
            .unwrap()
            .unwrap();
        assert_eq!(relayed.encode(), vec![b"opaque".to_vec()]);

        assert!(surrogate.on_gossip(b"opaque").unwrap().is_none());
        assert!(surrogate.on_gossip_unicast(PeerName(1), b"x").is_ok());
        assert!(surrogate.gossip().is_none());
    }

    #[test]
    fn test_surrogate_data_merge_keeps_order() {
        let mut data = SurrogateData::new(b"a");
        data.merge(SurrogateData::new(b"b"));
        assert_eq!(data.encode(), vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
