//! Live client set

use courier_messenger::{ConnectionId, Messenger};
use std::collections::HashMap;
use std::sync::Arc;

/// Connections currently attached to a server
#[derive(Default)]
pub struct ClientRegistry {
    clients: HashMap<ConnectionId, Arc<Messenger>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Registering the same connection twice is a no-op.
    pub fn register(&mut self, messenger: Arc<Messenger>) {
        self.clients.entry(messenger.id()).or_insert(messenger);
    }

    /// Remove a connection, returning it if it was present
    pub fn deregister(&mut self, id: &ConnectionId) -> Option<Arc<Messenger>> {
        self.clients.remove(id)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Arc<Messenger>> {
        self.clients.get(id)
    }

    /// Snapshot of every live connection
    pub fn list(&self) -> Vec<Arc<Messenger>> {
        self.clients.values().cloned().collect()
    }

    /// Remove and return every connection
    pub fn drain(&mut self) -> Vec<Arc<Messenger>> {
        self.clients.drain().map(|(_, m)| m).collect()
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_messenger::transport::split;

    fn messenger() -> Arc<Messenger> {
        let (a, _b) = tokio::io::duplex(1024);
        let (reader, writer) = split(a);
        Messenger::builder(reader, writer).build()
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let mut registry = ClientRegistry::new();
        let m = messenger();
        registry.register(m.clone());
        registry.register(m.clone());
        assert_eq!(registry.count(), 1);
        assert!(registry.get(&m.id()).is_some());
    }

    #[tokio::test]
    async fn test_deregister_and_drain() {
        let mut registry = ClientRegistry::new();
        let first = messenger();
        let second = messenger();
        registry.register(first.clone());
        registry.register(second.clone());

        assert!(registry.deregister(&first.id()).is_some());
        assert!(registry.deregister(&first.id()).is_none());
        assert_eq!(registry.list().len(), 1);

        let drained = registry.drain();
        assert_eq!(drained[0].id(), second.id());
        assert!(registry.is_empty());
    }
}
