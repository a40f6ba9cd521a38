//! Application gossip data contract

/// Mergeable, application-owned state handed to the gossip engine.
///
/// The engine never looks inside: it encodes, frames and forwards. `encode`
/// may return several fragments because merged state can outgrow a single
/// message; each fragment must decode on its own on the receiving side.
pub trait GossipData: Clone + Send + 'static {
    /// Encode into independently decodable fragments
    fn encode(&self) -> Vec<Vec<u8>>;

    /// Fold `other` into `self`
    fn merge(&mut self, other: Self);
}
