//! Per-connection gossip sender
//!
//! Each sender owns one delivery task and a one-slot mailbox. Producers merge
//! into whatever is still unsent, so a slow connection only ever holds the
//! current combined state, never a backlog of historical deltas.

use crate::connection::{ConnectionId, ConnectionRef};
use mesh_gossip_core::{envelope, GossipData, PeerName, ProtocolMsg, ProtocolTag};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// State shared between the handle and its delivery task
struct Mailbox<D> {
    pending: Mutex<Option<D>>,
    stopped: AtomicBool,
    more: Notify,
}

/// What the delivery task needs to frame gossip for one connection
struct Outbound {
    conn: ConnectionRef,
    channel: Arc<str>,
    ourself: PeerName,
    max_message_len: usize,
}

/// Coalescing asynchronous sender for one connection
pub struct GossipSender<D: GossipData> {
    connection: ConnectionId,
    mailbox: Arc<Mailbox<D>>,
    handle: JoinHandle<()>,
}

impl<D: GossipData> GossipSender<D> {
    /// Start a delivery task for `conn`. Must be called inside a tokio runtime.
    pub fn spawn(
        conn: ConnectionRef,
        channel: Arc<str>,
        ourself: PeerName,
        max_message_len: usize,
    ) -> Self {
        let mailbox = Arc::new(Mailbox {
            pending: Mutex::new(None),
            stopped: AtomicBool::new(false),
            more: Notify::new(),
        });
        let connection = conn.id();
        let outbound = Outbound {
            conn,
            channel,
            ourself,
            max_message_len,
        };
        let handle = tokio::spawn(deliver(mailbox.clone(), outbound));

        Self {
            connection,
            mailbox,
            handle,
        }
    }

    /// Hand over new data without waiting.
    ///
    /// Folds into any update still waiting to go out. Dropped once stopped.
    pub fn send(&self, data: D) {
        if self.is_stopped() {
            return;
        }
        {
            let mut pending = self.mailbox.pending.lock();
            match pending.as_mut() {
                Some(existing) => existing.merge(data),
                None => *pending = Some(data),
            }
        }
        self.mailbox.more.notify_one();
    }

    /// Terminate the delivery task. Unsent data is discarded.
    pub fn stop(&self) {
        if self.mailbox.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.handle.abort();
        self.mailbox.more.notify_one();
        self.mailbox.pending.lock().take();
        debug!("Stopped gossip sender for {}", self.connection);
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.mailbox.stopped.load(Ordering::Acquire)
    }

    /// Whether the delivery task has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<D: GossipData> Drop for GossipSender<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn deliver<D: GossipData>(mailbox: Arc<Mailbox<D>>, out: Outbound) {
    loop {
        mailbox.more.notified().await;
        if mailbox.stopped.load(Ordering::Acquire) {
            break;
        }
        let next = mailbox.pending.lock().take();
        let Some(pending) = next else {
            continue;
        };

        let fragments = pending.encode();
        if let Some(len) = oversized_fragment(&fragments, out.max_message_len) {
            abort_oversized(len, out.max_message_len, &out.channel, out.conn.remote_name());
        }

        for fragment in fragments {
            let payload = match envelope::encode_gossip(&out.channel, out.ourself, &fragment) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("[gossip {}]: failed to encode fragment: {}", out.channel, e);
                    continue;
                }
            };
            let msg = ProtocolMsg::new(ProtocolTag::Gossip, payload);
            if let Err(e) = out.conn.send_protocol_msg(msg).await {
                debug!(
                    "[gossip {}]: send to {} failed: {}",
                    out.channel,
                    out.conn.remote_name(),
                    e
                );
                break;
            }
        }
    }
}

/// Length of the first fragment over `max_len`, if any.
///
/// Checked for the whole update before anything is sent, so an oversized
/// update never leaves partially.
pub fn oversized_fragment(fragments: &[Vec<u8>], max_len: usize) -> Option<usize> {
    fragments
        .iter()
        .map(Vec::len)
        .find(|&len| len > max_len)
}

/// An oversized fragment is a bug in the gossiper's encoding. Terminate the
/// whole process, whatever the embedder's panic strategy.
fn abort_oversized(len: usize, max_len: usize, channel: &str, to: PeerName) -> ! {
    error!(
        "Gossip message too large: len={} bytes (max {}); on channel '{}' to {}",
        len, max_len, channel, to
    );
    std::process::abort()
}
