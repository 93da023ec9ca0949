use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use dfs_p2p::{same_peer, Peer, PeerHandler, ProtocolResult};

/// Connected peers keyed by remote address string.
///
/// Registration and removal take the write lock; broadcast only holds the
/// read lock long enough to clone the peer handles.
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, Arc<dyn Peer>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `peer`, replacing and returning any entry with the same address.
    pub fn register(&self, peer: Arc<dyn Peer>) -> Option<Arc<dyn Peer>> {
        let addr = peer.remote_addr().to_string();
        let previous = self
            .peers
            .write()
            .expect("registry lock poisoned")
            .insert(addr.clone(), peer);
        info!(peer = %addr, replaced = previous.is_some(), "registered peer");
        previous
    }

    /// Remove whatever is registered under `addr`.
    pub fn remove(&self, addr: &str) -> Option<Arc<dyn Peer>> {
        self.peers
            .write()
            .expect("registry lock poisoned")
            .remove(addr)
    }

    /// Remove `peer` only if it is still the registered entry for its
    /// address. A newer connection from the same address is kept.
    pub fn remove_peer(&self, peer: &Arc<dyn Peer>) -> bool {
        let addr = peer.remote_addr().to_string();
        let mut peers = self.peers.write().expect("registry lock poisoned");
        match peers.get(&addr) {
            Some(current) if same_peer(current, peer) => {
                peers.remove(&addr);
                debug!(peer = %addr, "removed peer");
                true
            }
            _ => false,
        }
    }

    /// Handles to every registered peer at this instant.
    pub fn snapshot(&self) -> Vec<Arc<dyn Peer>> {
        self.peers
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Registered addresses, sorted.
    pub fn addrs(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self
            .peers
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        addrs.sort();
        addrs
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.peers
            .read()
            .expect("registry lock poisoned")
            .contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.peers.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PeerHandler for PeerRegistry {
    fn on_peer(&self, peer: Arc<dyn Peer>) -> ProtocolResult<()> {
        self.register(peer);
        Ok(())
    }

    fn on_peer_disconnected(&self, peer: &Arc<dyn Peer>) {
        if self.remove_peer(peer) {
            info!(peer = %peer.remote_addr(), "peer disconnected");
        }
    }
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("peers", &self.addrs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPeer;

    #[test]
    fn register_and_snapshot() {
        let registry = PeerRegistry::new();
        assert!(registry.is_empty());

        registry.register(MockPeer::healthy("127.0.0.1:4000"));
        registry.register(MockPeer::healthy("127.0.0.1:3000"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.snapshot().len(), 2);
        assert_eq!(registry.addrs(), vec!["127.0.0.1:3000", "127.0.0.1:4000"]);
        assert!(registry.contains("127.0.0.1:3000"));
    }

    #[test]
    fn same_address_replaces_entry() {
        let registry = PeerRegistry::new();
        let first: Arc<dyn Peer> = MockPeer::healthy("127.0.0.1:3000");
        let second: Arc<dyn Peer> = MockPeer::healthy("127.0.0.1:3000");

        assert!(registry.register(first.clone()).is_none());
        let replaced = registry.register(second.clone()).expect("first entry replaced");
        assert!(same_peer(&replaced, &first));
        assert_eq!(registry.len(), 1);

        // The stale connection going away must not evict the new one.
        assert!(!registry.remove_peer(&first));
        assert!(registry.contains("127.0.0.1:3000"));
        assert!(registry.remove_peer(&second));
        assert!(registry.is_empty());
    }

    #[test]
    fn handler_callbacks_track_lifecycle() {
        let registry = PeerRegistry::new();
        let peer: Arc<dyn Peer> = MockPeer::healthy("10.0.0.1:9000");
        registry.on_peer(peer.clone()).unwrap();
        assert!(registry.contains("10.0.0.1:9000"));

        registry.on_peer_disconnected(&peer);
        assert!(!registry.contains("10.0.0.1:9000"));
    }

    #[test]
    fn remove_by_address() {
        let registry = PeerRegistry::new();
        registry.register(MockPeer::healthy("10.0.0.1:9000"));
        assert!(registry.remove("10.0.0.1:9000").is_some());
        assert!(registry.remove("10.0.0.1:9000").is_none());
    }
}
