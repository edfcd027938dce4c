use std::sync::Arc;

use dashmap::DashMap;

use super::connection::Connection;

/// Live connections by gateway UID
///
/// Entries are published when a session is established and retracted
/// before it is torn down; lookups skip connections that are already closed.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a connection, returning the one it replaces
    pub fn insert(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        let uid = connection.gateway().uid().to_string();
        self.connections.insert(uid, connection)
    }

    /// Returns the live connection of a gateway
    pub fn get(&self, uid: &str) -> Option<Arc<Connection>> {
        self.connections
            .get(uid)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|connection| !connection.is_closed())
    }

    /// Retracts the entry of this exact connection.
    ///
    /// A newer session of the same gateway is left in place.
    pub fn remove(&self, connection: &Arc<Connection>) -> bool {
        self.connections
            .remove_if(connection.gateway().uid(), |_, current| Arc::ptr_eq(current, connection))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
