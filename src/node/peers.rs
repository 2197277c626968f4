//! Cluster membership as seen by one node.
//!
//! Discovery is not this crate's job: peers come from configuration and can
//! be changed by an operator at runtime. Readers take a cheap snapshot per
//! decision or per flush cycle.
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use super::NodeName;

/// Sorted, de-duplicated set of cluster members (including this node)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerSet {
    members: Vec<NodeName>,
}

impl PeerSet {
    pub fn new(members: impl IntoIterator<Item = NodeName>) -> Self {
        let mut members: Vec<NodeName> = members.into_iter().collect();
        members.sort();
        members.dedup();
        Self { members }
    }

    pub fn members(&self) -> &[NodeName] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, name: &NodeName) -> bool {
        self.members.binary_search(name).is_ok()
    }
}

/// Source of the current peer list
pub trait PeerProvider: Send + Sync + std::fmt::Debug {
    /// Read-only snapshot of current members
    fn snapshot(&self) -> Arc<PeerSet>;
}

/// Peer list from configuration, editable by an operator
#[derive(Debug)]
pub struct StaticPeers {
    local: NodeName,
    current: RwLock<Arc<PeerSet>>,
}

impl StaticPeers {
    /// The local node is always a member.
    pub fn new(local: NodeName, peers: impl IntoIterator<Item = NodeName>) -> Self {
        let set = PeerSet::new(peers.into_iter().chain(std::iter::once(local.clone())));
        Self {
            local,
            current: RwLock::new(Arc::new(set)),
        }
    }

    pub fn add_peer(&self, peer: NodeName) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.contains(&peer) {
            return;
        }
        info!("[{}] Adding peer {}", self.local, peer);
        let members = current.members().iter().cloned().chain(std::iter::once(peer));
        *current = Arc::new(PeerSet::new(members));
    }

    pub fn remove_peer(&self, peer: &NodeName) {
        if peer == &self.local {
            return;
        }
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if !current.contains(peer) {
            return;
        }
        info!("[{}] Removing peer {}", self.local, peer);
        let members = current.members().iter().filter(|m| *m != peer).cloned();
        *current = Arc::new(PeerSet::new(members));
    }
}

impl PeerProvider for StaticPeers {
    fn snapshot(&self) -> Arc<PeerSet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> NodeName {
        NodeName::from(s)
    }

    #[test]
    fn peer_set_is_sorted_and_unique() {
        let set = PeerSet::new(vec![name("http://c"), name("http://a"), name("http://c")]);
        assert_eq!(set.members(), &[name("http://a"), name("http://c")]);
        assert!(set.contains(&name("http://a")));
        assert!(!set.contains(&name("http://b")));
    }

    #[test]
    fn static_peers_always_include_local() {
        let peers = StaticPeers::new(name("http://a"), vec![name("http://b")]);
        assert_eq!(peers.snapshot().len(), 2);
        peers.remove_peer(&name("http://a"));
        assert!(peers.snapshot().contains(&name("http://a")));
    }

    #[test]
    fn add_and_remove_peers() {
        let peers = StaticPeers::new(name("http://a"), Vec::new());
        let before = peers.snapshot();
        peers.add_peer(name("http://b"));
        peers.add_peer(name("http://b"));
        assert_eq!(peers.snapshot().len(), 2);
        // earlier snapshots are unaffected
        assert_eq!(before.len(), 1);
        peers.remove_peer(&name("http://b"));
        assert_eq!(peers.snapshot().members(), &[name("http://a")]);
    }
}
