//! # Client Registry
//!
//! The one piece of state shared by every connection handler. Records are
//! indexed twice, by connection and by registered identity, and both indexes
//! live behind a single lock so they can never disagree.
//!
//! Callers never get a reference into the registry: lookups and
//! [`ClientRegistry::snapshot`] hand out clones, which keeps fan-out
//! iteration independent of concurrent registrations and disconnects.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::RwLock;

use crate::common::connection::{Connection, ConnectionId};
use crate::common::error::Rejection;

/// Point-in-time view of one client.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub connection: Arc<Connection>,
    pub identity: Option<String>,
    pub language: Option<String>,
}

impl ClientRecord {
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn is_alive(&self) -> bool {
        self.connection.is_alive()
    }
}

#[derive(Default)]
struct Indexes {
    by_connection: HashMap<ConnectionId, ClientRecord>,
    by_identity: HashMap<String, ConnectionId>,
}

/// Concurrent-safe store of all active connections.
#[derive(Default)]
pub struct ClientRegistry {
    inner: RwLock<Indexes>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new, unregistered record for `connection`.
    pub async fn add(&self, connection: Arc<Connection>) -> ConnectionId {
        let id = connection.id();
        let record = ClientRecord {
            connection,
            identity: None,
            language: None,
        };
        self.inner.write().await.by_connection.insert(id, record);
        id
    }

    /// Bind `identity` and `language` to the record of `id`.
    ///
    /// Last writer wins: if another record already holds `identity`, that
    /// record loses the identity (it stays connected) and its id is returned.
    /// A record that re-registers under a new name releases its old one.
    ///
    /// # Returns
    /// - `Ok(Some(evicted))`: `identity` was taken over from another record
    /// - `Ok(None)`: nothing was evicted
    /// - `Err(Rejection::UnknownConnection)`: `id` is not in the registry
    pub async fn bind_identity(
        &self,
        id: ConnectionId,
        identity: &str,
        language: &str,
    ) -> Result<Option<ConnectionId>, Rejection> {
        let mut guard = self.inner.write().await;
        let indexes = &mut *guard;

        let record = indexes
            .by_connection
            .get_mut(&id)
            .ok_or(Rejection::UnknownConnection(id))?;
        if let Some(old) = record.identity.replace(identity.to_string()) {
            if old != identity && indexes.by_identity.get(&old) == Some(&id) {
                indexes.by_identity.remove(&old);
            }
        }
        record.language = Some(language.to_string());

        let previous = indexes.by_identity.insert(identity.to_string(), id);
        let evicted = previous.filter(|prev| *prev != id);

        if let Some(evicted_id) = evicted {
            if let Some(evicted_record) = indexes.by_connection.get_mut(&evicted_id) {
                evicted_record.identity = None;
                info!(
                    "🔁 Identity '{}' rebound from {} to {}",
                    identity,
                    evicted_record.connection.addr(),
                    id
                );
            }
        }

        Ok(evicted)
    }

    /// Change the stored language of `id`. Returns `false` if `id` is unknown.
    pub async fn update_language(&self, id: ConnectionId, language: &str) -> bool {
        match self.inner.write().await.by_connection.get_mut(&id) {
            Some(record) => {
                record.language = Some(language.to_string());
                true
            }
            None => false,
        }
    }

    /// Remove `id` from both indexes. Removing twice is a no-op.
    pub async fn remove(&self, id: ConnectionId) -> Option<ClientRecord> {
        let mut indexes = self.inner.write().await;
        let record = indexes.by_connection.remove(&id)?;
        if let Some(identity) = &record.identity {
            if indexes.by_identity.get(identity) == Some(&id) {
                indexes.by_identity.remove(identity);
            }
        }
        debug!("Removed {} ({:?}) from registry", id, record.identity);
        Some(record)
    }

    /// Copy of every record, for iteration outside the lock.
    pub async fn snapshot(&self) -> Vec<ClientRecord> {
        self.inner.read().await.by_connection.values().cloned().collect()
    }

    pub async fn lookup_by_identity(&self, identity: &str) -> Option<ConnectionId> {
        self.inner.read().await.by_identity.get(identity).copied()
    }

    pub async fn get(&self, id: ConnectionId) -> Option<ClientRecord> {
        self.inner.read().await.by_connection.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_connection.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove and return every record; used at shutdown.
    pub async fn drain(&self) -> Vec<ClientRecord> {
        let mut indexes = self.inner.write().await;
        indexes.by_identity.clear();
        indexes.by_connection.drain().map(|(_, record)| record).collect()
    }
}
