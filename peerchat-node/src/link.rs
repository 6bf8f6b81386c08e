//! PeerLink: one live TCP socket to a peer, framed with the core wire codec.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use peerchat_core::wire::{self, FrameDecodeError, FrameEncodeError, LEN_SIZE};
use peerchat_core::{Message, PeerId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, MutexGuard};

/// Send and receive may run concurrently; concurrent senders are serialized by the write lock.
/// `close` interrupts any in-flight read or write on the link.
pub struct PeerLink {
    peer_id: PeerId,
    remote: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    turn: Mutex<()>,
    connected: AtomicBool,
    shut_down: AtomicBool,
    closed: watch::Sender<bool>,
}

impl PeerLink {
    /// Wrap a connected socket. The peer id is the remote endpoint as observed now.
    pub fn new(stream: TcpStream) -> std::io::Result<Self> {
        let remote = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let (closed, _) = watch::channel(false);
        Ok(Self {
            peer_id: PeerId::from(remote),
            remote,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            turn: Mutex::new(()),
            connected: AtomicBool::new(true),
            shut_down: AtomicBool::new(false),
            closed,
        })
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Sequence a send with bookkeeping that must follow wire order. Holders send and record
    /// before releasing; sends that skip the turn are still frame-atomic.
    pub async fn send_turn(&self) -> MutexGuard<'_, ()> {
        self.turn.lock().await
    }

    /// Encode and write one full frame under the write lock.
    /// Any failure other than encoding leaves the link disconnected.
    pub async fn send(&self, msg: &Message) -> Result<(), LinkError> {
        let frame = wire::encode_frame(msg)?;
        if !self.is_connected() {
            return Err(LinkError::Closed);
        }
        let mut closed = self.closed.subscribe();
        let mut writer = self.writer.lock().await;
        if !self.is_connected() {
            return Err(LinkError::Closed);
        }
        let result = tokio::select! {
            _ = wait_closed(&mut closed) => Err(LinkError::Closed),
            r = async {
                writer.write_all(&frame).await?;
                writer.flush().await
            } => r.map_err(LinkError::Io),
        };
        if result.is_err() {
            self.mark_closed();
        }
        result
    }

    /// Wait for the next full frame. Every error is terminal for the link.
    pub async fn receive(&self) -> Result<Message, LinkError> {
        if !self.is_connected() {
            return Err(LinkError::Closed);
        }
        let mut closed = self.closed.subscribe();
        let mut reader = self.reader.lock().await;
        let result = tokio::select! {
            _ = wait_closed(&mut closed) => Err(LinkError::Closed),
            r = read_frame(&mut reader) => r,
        };
        if result.is_err() {
            self.mark_closed();
        }
        result
    }

    /// Idempotent. Wakes blocked readers and writers, then shuts down the write side so the
    /// peer sees end-of-stream. The descriptor is released when the last handle is dropped.
    pub async fn close(&self) {
        self.mark_closed();
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    fn mark_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.send_replace(true);
    }
}

/// A link is equal only to itself: two sockets to the same endpoint are different links.
impl PartialEq for PeerLink {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for PeerLink {}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("peer_id", &self.peer_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Resolves once the flag turns true (or its sender is gone).
pub(crate) async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    loop {
        let closed = *rx.borrow_and_update();
        if closed {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn read_frame(reader: &mut OwnedReadHalf) -> Result<Message, LinkError> {
    let mut prefix = [0u8; LEN_SIZE];
    reader.read_exact(&mut prefix).await?;
    let len = wire::frame_len(prefix)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(wire::decode_body(&body)?)
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link closed")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameDecodeError),
    #[error("cannot encode message: {0}")]
    Encode(#[from] FrameEncodeError),
}

impl LinkError {
    /// True when the link can no longer be used.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LinkError::Encode(_))
    }
}
