//! Connection bookkeeping for the server.
//!
//! Each accepted socket gets a dedicated task and a registry entry tracking
//! which phase of the per-connection protocol state machine it's in. The
//! registry exists for visibility and graceful-shutdown draining, not for
//! fan-out: WHIP-LRU's wire protocol is strict request/response over one
//! socket, so there is no broadcast path to other connections the way a
//! pub/sub server needs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::RwLock;

/// Unique identifier for a connection, assigned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Where a connection is in the per-connection protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Just accepted; the auth challenge has been sent but not yet answered.
    Accepting,
    /// The challenge has been sent, waiting on the client's response.
    Challenged,
    /// Authenticated; accepting request frames.
    Ready,
    /// The socket has been closed.
    Disconnected,
}

/// Handle to a single tracked connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Unique connection identifier assigned by the registry.
    pub id: ConnectionId,
    /// When this connection was accepted.
    pub connected_at: Instant,
    phase: RwLock<Phase>,
}

impl ConnectionHandle {
    /// Current protocol phase.
    pub async fn phase(&self) -> Phase {
        *self.phase.read().await
    }

    /// Transitions to a new protocol phase.
    pub async fn set_phase(&self, phase: Phase) {
        *self.phase.write().await = phase;
    }
}

/// Thread-safe registry of all active connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates a new empty registry. Connection IDs start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a newly accepted connection in the `Accepting` phase.
    pub fn register(&self) -> Arc<ConnectionHandle> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(ConnectionHandle {
            id,
            connected_at: Instant::now(),
            phase: RwLock::new(Phase::Accepting),
        });
        self.connections.insert(id, Arc::clone(&handle));
        handle
    }

    /// Removes a connection from the registry, returning its handle if found.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.remove(&id).map(|(_, handle)| handle)
    }

    /// Looks up a connection by id.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&id).map(|r| r.value().clone())
    }

    /// Total number of active connections.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Returns all active connections as a collected `Vec`.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Removes and returns all connections. Used during graceful shutdown.
    pub fn drain_all(&self) -> Vec<Arc<ConnectionHandle>> {
        let keys: Vec<ConnectionId> = self.connections.iter().map(|entry| *entry.key()).collect();
        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, handle)) = self.connections.remove(&key) {
                handles.push(handle);
            }
        }
        handles
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_count() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.count(), 0);
        let handle = registry.register();
        assert_eq!(registry.count(), 1);
        assert_eq!(handle.id, ConnectionId(1));
    }

    #[test]
    fn connection_ids_increment() {
        let registry = ConnectionRegistry::new();
        let h1 = registry.register();
        let h2 = registry.register();
        assert_eq!(h1.id, ConnectionId(1));
        assert_eq!(h2.id, ConnectionId(2));
    }

    #[test]
    fn remove_and_get() {
        let registry = ConnectionRegistry::new();
        let handle = registry.register();
        let id = handle.id;
        assert!(registry.get(id).is_some());
        assert!(registry.remove(id).is_some());
        assert!(registry.get(id).is_none());
        assert!(registry.remove(id).is_none());
    }

    #[test]
    fn drain_all_empties_registry() {
        let registry = ConnectionRegistry::new();
        registry.register();
        registry.register();
        let drained = registry.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn phase_transitions() {
        let registry = ConnectionRegistry::new();
        let handle = registry.register();
        assert_eq!(handle.phase().await, Phase::Accepting);
        handle.set_phase(Phase::Challenged).await;
        assert_eq!(handle.phase().await, Phase::Challenged);
        handle.set_phase(Phase::Ready).await;
        assert_eq!(handle.phase().await, Phase::Ready);
    }
}
