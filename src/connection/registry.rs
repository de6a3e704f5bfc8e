//! Connection Registry
//!
//! Shared store of live connections. Lookups, inserts and removals go through
//! concurrent maps; the insertion-ordered id index used for listings sits
//! behind its own mutex. The two can disagree for a moment: an id stays in the
//! index after its connection has been removed, so readers of the index must
//! tolerate missing entries.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::net::tcp::OwnedWriteHalf;
use tracing::debug;

use super::{Connection, ConnectionId, Direction};
use crate::error::ConnectionError;

/// Concurrent registry of live connections plus the ordered id index
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    /// Remote endpoint -> owning connection, the duplicate guard
    endpoints: DashMap<SocketAddr, ConnectionId>,
    /// Every id ever registered, in issue order. Append-only.
    order: Mutex<Vec<ConnectionId>>,
    next_id: AtomicU32,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            endpoints: DashMap::new(),
            order: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Whether a live connection to `addr` is registered
    pub fn contains_endpoint(&self, addr: &SocketAddr) -> bool {
        self.endpoints.contains_key(addr)
    }

    /// Register a connection to `remote_addr`, unless one already exists.
    ///
    /// The endpoint slot is claimed atomically, so two concurrent registrations
    /// for the same peer cannot both succeed. The id is drawn while the order
    /// lock is held, which keeps the index strictly ascending.
    pub fn register(
        &self,
        remote_addr: SocketAddr,
        direction: Direction,
        writer: OwnedWriteHalf,
    ) -> Result<Arc<Connection>, ConnectionError> {
        match self.endpoints.entry(remote_addr) {
            Entry::Occupied(existing) => {
                debug!(
                    "Endpoint {} already owned by connection {}",
                    remote_addr,
                    existing.get()
                );
                Err(ConnectionError::ConnectionExists {
                    ip: remote_addr.ip().to_string(),
                    port: remote_addr.port(),
                })
            }
            Entry::Vacant(slot) => {
                let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
                let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
                let connection = Arc::new(Connection::new(id, remote_addr, direction, writer));

                self.connections.insert(id, Arc::clone(&connection));
                order.push(id);
                drop(order);
                slot.insert(id);

                debug!("Registered {} connection {} for {}", direction.as_str(), id, remote_addr);
                Ok(connection)
            }
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a connection and release its endpoint. Returns `None` if it was
    /// already gone.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let (_, connection) = self.connections.remove(&id)?;
        self.endpoints
            .remove_if(&connection.remote_addr(), |_, owner| *owner == id);
        debug!("Deregistered connection {}", id);
        Some(connection)
    }

    /// Ids in issue order, including ones whose connection is already gone
    pub fn issued_ids(&self) -> Vec<ConnectionId> {
        self.order
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Live connections in ascending id order. Connections removed between
    /// reading the index and the lookup are skipped.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.issued_ids()
            .into_iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Every live connection, in no particular order
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
