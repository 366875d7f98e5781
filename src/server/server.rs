//! # Relay Server
//!
//! Accepts client connections and starts one [`ConnectionHandler`] task per
//! connection. The server owns the listener and the [`ClientRegistry`] for its
//! whole lifetime; nothing is process-global, so several servers can run side
//! by side (tests bind `127.0.0.1:0`).
//!
//! [`ConnectionHandler`]: super::handler::ConnectionHandler

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};

use crate::common::connection::Connection;
use crate::server::config::{RelayConfig, RelaySettings};
use crate::server::handler::spawn_handler;
use crate::server::registry::ClientRegistry;
use crate::server::router::Router;

pub struct RelayServer {
    listener: TcpListener,
    registry: Arc<ClientRegistry>,
    router: Router,
    settings: RelaySettings,
    max_connections: usize,
}

impl RelayServer {
    /// Bind the listening socket described by `config`.
    ///
    /// # Example
    /// ```ignore
    /// let server = RelayServer::bind(RelayConfig::default()).await?;
    /// server.run_until(tokio::signal::ctrl_c().map(|_| ())).await?;
    /// ```
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let address = config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("failed to bind {}", address))?;

        let registry = Arc::new(ClientRegistry::new());
        let router = Router::new(registry.clone());

        Ok(Self {
            listener,
            registry,
            router,
            settings: config.relay,
            max_connections: config.server.max_connections,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.registry.clone()
    }

    /// Accept connections until `shutdown` resolves, then disconnect everyone.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            "📡 Relay listening on {} ({:?} framing)",
            self.local_addr()?,
            self.settings.framing
        );

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("🛑 Shutdown requested");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept(stream, addr).await,
                    Err(e) => error!("❌ Accept error: {}", e),
                },
            }
        }

        let RelayServer { listener, registry, .. } = self;
        drop(listener);
        disconnect_all(&registry).await;
        Ok(())
    }

    /// Accept connections for the rest of the process lifetime.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    async fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        if self.registry.len().await >= self.max_connections {
            warn!(
                "🚧 Rejecting {}: connection limit ({}) reached",
                addr, self.max_connections
            );
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
        }

        let (reader, writer) = stream.into_split();
        let connection = Arc::new(Connection::new(addr, writer));
        self.registry.add(connection.clone()).await;
        info!("🔗 Client connected: {}", addr);

        spawn_handler(connection, reader, self.router.clone(), &self.settings);
    }
}

/// Remove and close every live connection.
async fn disconnect_all(registry: &ClientRegistry) {
    let records = registry.drain().await;
    let count = records.len();
    for record in records {
        record.connection.close().await;
    }
    info!("👋 Disconnected {} client(s)", count);
}
