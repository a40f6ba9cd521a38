//! Connection over an established async byte stream
//!
//! Frames protocol messages with [`FrameCodec`]. Outbound messages go through
//! a bounded queue drained by a writer task; a reader task reports inbound
//! frames and the end of the stream as [`TransportEvent`]s.

use crate::connection::{Connection, ConnectionId, TransportError, TransportEvent};
use crate::framing::FrameCodec;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use mesh_gossip_core::{PeerName, ProtocolMsg};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

/// Connection to a peer over a framed byte stream
pub struct StreamConnection {
    id: ConnectionId,
    /// Peer on the other end
    remote: PeerName,
    /// Outbound queue
    tx: mpsc::Sender<ProtocolMsg>,
    /// Is the connection open
    open: Arc<RwLock<bool>>,
    reader: AbortHandle,
    writer: AbortHandle,
}

impl StreamConnection {
    /// Take over `stream` and start its reader and writer tasks.
    ///
    /// At most `queue_depth` outbound messages wait for the writer.
    pub fn spawn<S>(
        remote: PeerName,
        stream: S,
        queue_depth: usize,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = ConnectionId::next();
        let open = Arc::new(RwLock::new(true));
        let (tx, rx) = mpsc::channel(queue_depth);
        let (read_half, write_half) = tokio::io::split(stream);

        let writer = tokio::spawn(write_loop(
            id,
            remote,
            FramedWrite::new(write_half, FrameCodec::new()),
            rx,
            open.clone(),
        ));
        let reader = tokio::spawn(read_loop(
            id,
            remote,
            FramedRead::new(read_half, FrameCodec::new()),
            events,
            open.clone(),
        ));

        Arc::new(Self {
            id,
            remote,
            tx,
            open,
            reader: reader.abort_handle(),
            writer: writer.abort_handle(),
        })
    }

    /// Check if connection is open
    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    /// Close the connection and stop its tasks
    pub fn close(&self) {
        *self.open.write() = false;
        self.reader.abort();
        self.writer.abort();
    }
}

#[async_trait]
impl Connection for StreamConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_name(&self) -> PeerName {
        self.remote
    }

    async fn send_protocol_msg(&self, msg: ProtocolMsg) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.tx
            .send(msg)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn try_send_protocol_msg(&self, msg: ProtocolMsg) -> bool {
        self.is_open() && self.tx.try_send(msg).is_ok()
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop<W>(
    id: ConnectionId,
    remote: PeerName,
    mut sink: FramedWrite<W, FrameCodec>,
    mut rx: mpsc::Receiver<ProtocolMsg>,
    open: Arc<RwLock<bool>>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        if let Err(e) = sink.send(msg).await {
            warn!("Write to {} ({}) failed: {}", remote, id, e);
            break;
        }
    }
    *open.write() = false;
    debug!("Writer for {} ({}) finished", remote, id);
}

async fn read_loop<R>(
    id: ConnectionId,
    remote: PeerName,
    mut frames: FramedRead<R, FrameCodec>,
    events: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<RwLock<bool>>,
) where
    R: AsyncRead + Unpin,
{
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(msg) => {
                let event = TransportEvent::FrameReceived {
                    connection: id,
                    from: remote,
                    msg,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Read from {} ({}) failed: {}", remote, id, e);
                break;
            }
        }
    }
    *open.write() = false;
    let _ = events.send(TransportEvent::Disconnected {
        connection: id,
        peer: remote,
    });
}
