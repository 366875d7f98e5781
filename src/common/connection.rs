//! # Relay Connection
//!
//! Write side of one accepted client connection.
//!
//! The read half stays with the connection's handler task; this struct is
//! what the registry shares with every other handler so they can deliver
//! fan-out events. Writes are serialized by a per-connection lock, so events
//! from concurrent senders never interleave mid-line:
//! ```text
//! [handler A] ──┐
//! [handler B] ──┼──> Mutex<writer> ──> socket
//! [handler C] ──┘
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use super::error::RelayError;
use super::messages::Event;

/// Handle identifying one connection for its whole lifetime.
pub type ConnectionId = Uuid;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared write handle plus liveness state of a client connection.
pub struct Connection {
    id: ConnectionId,
    addr: SocketAddr,
    writer: Mutex<BoxedWriter>,
    alive: AtomicBool,
    /// Flips to `true` once the connection is closed, wherever that happens.
    closed_tx: watch::Sender<bool>,
}

impl Connection {
    /// Wrap the write half of a stream.
    ///
    /// # Arguments
    /// - `addr`: Remote address, used for diagnostics only
    /// - `writer`: Write half of the client's stream
    ///
    /// # Example
    /// ```ignore
    /// let (reader, writer) = stream.into_split();
    /// let conn = Arc::new(Connection::new(addr, writer));
    /// ```
    pub fn new<W>(addr: SocketAddr, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed_tx, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            addr,
            writer: Mutex::new(Box::new(writer)),
            alive: AtomicBool::new(true),
            closed_tx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Write one event to the peer.
    ///
    /// # Returns
    /// - `Ok(())`: the whole line was written and flushed
    /// - `Err(RelayError::Closed)`: the connection was already closed
    /// - `Err(RelayError::PeerWrite)`: the transport rejected the write
    pub async fn send_event(&self, event: &Event) -> Result<(), RelayError> {
        if !self.is_alive() {
            return Err(RelayError::Closed(self.id));
        }

        let data = event.to_bytes();
        let mut writer = self.writer.lock().await;

        let result = async {
            writer.write_all(&data).await?;
            writer.flush().await
        }
        .await;

        result.map_err(|source| RelayError::PeerWrite {
            id: self.id,
            addr: self.addr,
            source,
        })
    }

    /// Mark the connection dead, wake its handler and shut the write half.
    ///
    /// Safe to call more than once.
    pub async fn close(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        self.closed_tx.send_replace(true);

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Shutdown of {} returned: {}", self.addr, e);
        }
    }

    /// Receiver that observes [`Connection::close`].
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("alive", &self.is_alive())
            .finish()
    }
}
