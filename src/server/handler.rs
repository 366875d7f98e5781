//! # Connection Handler
//!
//! Per-connection read loop. Bytes go through the [`Framer`], each message is
//! decoded into a [`Command`] and handed to the [`Router`]. Failures are kept
//! as small as possible:
//!
//! - a malformed or rejected message is logged and dropped
//! - a read error or peer close ends this handler only
//!
//! ## State Machine
//! ```text
//! Unregistered --REGISTER--> Registered
//!       ^                        |
//!       +--- identity taken -----+
//!       |                        |
//!       +------ close/error -----+--> Closed
//! ```
//! Staying `Unregistered` does not block `VOICE`: clients may speak before
//! they register. A later REGISTER of the same identity on another
//! connection leaves this one anonymous; the handler notices when its next
//! identity-bound command is rejected.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::common::connection::Connection;
use crate::common::error::{ProtocolError, Rejection, RelayError};
use crate::common::framing::Framer;
use crate::common::messages::Command;
use crate::server::config::RelaySettings;
use crate::server::router::{Dispatch, Router};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registered,
    Closed,
}

/// Why a handler's read loop ended.
#[derive(Debug)]
pub enum Termination {
    /// Peer closed its side cleanly
    PeerClosed,
    /// Connection was closed from elsewhere (failed fan-out write, shutdown)
    ClosedLocally,
    IdleTimeout,
    ReadFailed(RelayError),
}

pub struct ConnectionHandler {
    connection: Arc<Connection>,
    router: Router,
    framer: Framer,
    read_buffer_bytes: usize,
    idle_timeout: Option<Duration>,
    state: SessionState,
}

impl ConnectionHandler {
    pub fn new(connection: Arc<Connection>, router: Router, settings: &RelaySettings) -> Self {
        Self {
            connection,
            router,
            framer: Framer::new(settings.framing, settings.max_message_bytes),
            read_buffer_bytes: settings.read_buffer_bytes.max(1),
            idle_timeout: settings.idle_timeout(),
            state: SessionState::Unregistered,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Read and dispatch until the connection ends, then remove its record.
    ///
    /// The connection must already be in the router's registry.
    pub async fn run<R>(mut self, mut reader: R) -> Termination
    where
        R: AsyncRead + Unpin,
    {
        let addr = self.connection.addr();
        let mut closed = self.connection.closed();
        let mut buf = vec![0u8; self.read_buffer_bytes];

        let termination = loop {
            let read = tokio::select! {
                result = read_with_timeout(&mut reader, &mut buf, self.idle_timeout) => result,
                _ = closed.wait_for(|c| *c) => break Termination::ClosedLocally,
            };

            match read {
                Ok(Some(0)) => {
                    if let Some(tail) = self.framer.finish() {
                        self.process_message(tail).await;
                    }
                    break Termination::PeerClosed;
                }
                Ok(Some(n)) => self.process_chunk(&buf[..n]).await,
                Ok(None) => break Termination::IdleTimeout,
                Err(source) => {
                    break Termination::ReadFailed(RelayError::PeerRead { addr, source });
                }
            }
        };

        match &termination {
            Termination::PeerClosed => info!("🔌 Client disconnected: {}", addr),
            Termination::ClosedLocally => debug!("🔌 Connection {} closed by relay", addr),
            Termination::IdleTimeout => warn!("⏱️  Client {} idle, disconnecting", addr),
            Termination::ReadFailed(e) => error!("❌ Client {} error: {}", addr, e),
        }

        self.router.purge(&self.connection).await;
        self.transition(SessionState::Closed);
        termination
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(
                "🔄 {} session {:?} -> {:?}",
                self.connection.addr(),
                self.state,
                next
            );
            self.state = next;
        }
    }

    async fn process_chunk(&mut self, chunk: &[u8]) {
        for message in self.framer.push(chunk) {
            self.process_message(message).await;
        }
    }

    async fn process_message(&mut self, message: Result<Vec<u8>, ProtocolError>) {
        let command = match message {
            Ok(bytes) => Command::from_bytes(&bytes),
            Err(e) => Command::Malformed(e),
        };
        self.process_command(command).await;
    }

    async fn process_command(&mut self, command: Command) {
        let addr = self.connection.addr();
        let kind = command.kind();
        let is_register = matches!(command, Command::Register { .. });

        match self.router.dispatch(self.connection.id(), command).await {
            Dispatch::Routed { delivered, purged } => {
                debug!(
                    "📨 {} from {} delivered to {} recipient(s), {} purged",
                    kind,
                    addr,
                    delivered,
                    purged.len()
                );
                if is_register {
                    self.transition(SessionState::Registered);
                }
            }
            Dispatch::Rejected(rejection) => {
                warn!("🚫 Ignoring {} from {}: {}", kind, addr, rejection);
                if matches!(rejection, Rejection::IdentityMismatch { bound: None, .. })
                    && self.state == SessionState::Registered
                {
                    info!("👤 Identity of {} was taken by another connection", addr);
                    self.transition(SessionState::Unregistered);
                }
            }
            Dispatch::Dropped(reason) => {
                warn!("⚠️  Dropping message from {}: {}", addr, reason);
            }
        }
    }
}

/// `Ok(None)` means the idle timeout elapsed.
async fn read_with_timeout<R>(
    reader: &mut R,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> std::io::Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, reader.read(buf)).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        },
        None => reader.read(buf).await.map(Some),
    }
}

/// Spawn a handler task for an already registered connection.
pub fn spawn_handler<R>(
    connection: Arc<Connection>,
    reader: R,
    router: Router,
    settings: &RelaySettings,
) -> tokio::task::JoinHandle<Termination>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let handler = ConnectionHandler::new(connection, router, settings);
    tokio::spawn(handler.run(reader))
}
