//! Origin selection: which node owns the authoritative counter for an identifier.
//!
//! Selection is a pure function of the identifier and the peer set, so every
//! node holding the same peer set agrees on the origin without coordination.
use std::sync::Arc;

use super::node_name::stable_hash;
use super::peers::PeerSet;
use super::NodeName;

pub const MAGIC_CONSTANT: u64 = 2862933555777941757;

/// Jump consistent hashing implementation
/// Based on:
/// https://arxiv.org/ftp/arxiv/papers/1406/1406.2294.pdf
///
/// The key string is reduced to a u64 with a hash that is stable across
/// processes, since every node must compute the same bucket.
pub fn jump_consistent_hash(key: &str, number_of_buckets: u32) -> u32 {
    let key_as_u64: u64 = stable_hash(key.as_bytes());
    let bucket_num = number_of_buckets as i64;

    let mut b: i64 = -1;
    let mut j: i64 = 0;
    let mut _key: u64 = key_as_u64;

    while j < bucket_num {
        b = j;
        _key = _key.wrapping_mul(MAGIC_CONSTANT).wrapping_add(1);
        j = ((b + 1) as f64 * ((1i64 << 31) as f64 / ((_key >> 33) + 1) as f64)) as i64;
    }
    b as u32
}

/// Pluggable origin policy
pub trait OriginSelector: Send + Sync + std::fmt::Debug {
    fn origin<'a>(&self, identifier: &str, peers: &'a PeerSet) -> Option<&'a NodeName>;
}

/// Jump hash over the sorted member list. Cheap, but a membership change in
/// the middle of the list moves more identifiers than strictly necessary.
#[derive(Clone, Copy, Debug, Default)]
pub struct JumpHashSelector;

impl OriginSelector for JumpHashSelector {
    fn origin<'a>(&self, identifier: &str, peers: &'a PeerSet) -> Option<&'a NodeName> {
        let number_of_buckets = u32::try_from(peers.len()).ok()?;
        if number_of_buckets == 0 {
            return None;
        }
        let bucket = jump_consistent_hash(identifier, number_of_buckets);
        peers.members().get(bucket as usize)
    }
}

/// Highest random weight hashing: only identifiers owned by a departed
/// member move when membership changes.
#[derive(Clone, Copy, Debug, Default)]
pub struct RendezvousSelector;

impl RendezvousSelector {
    fn weight(identifier: &str, peer: &NodeName) -> u64 {
        let mut buf = Vec::with_capacity(identifier.len() + peer.as_str().len() + 1);
        buf.extend_from_slice(identifier.as_bytes());
        buf.push(0);
        buf.extend_from_slice(peer.as_str().as_bytes());
        stable_hash(&buf)
    }
}

impl OriginSelector for RendezvousSelector {
    fn origin<'a>(&self, identifier: &str, peers: &'a PeerSet) -> Option<&'a NodeName> {
        peers
            .members()
            .iter()
            .max_by_key(|peer| (Self::weight(identifier, peer), *peer))
    }
}

/// Which selector a node runs with
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OriginStrategy {
    #[default]
    Jump,
    Rendezvous,
}

impl OriginStrategy {
    pub fn selector(&self) -> Arc<dyn OriginSelector> {
        match self {
            OriginStrategy::Jump => Arc::new(JumpHashSelector),
            OriginStrategy::Rendezvous => Arc::new(RendezvousSelector),
        }
    }
}

impl std::fmt::Display for OriginStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OriginStrategy::Jump => write!(f, "jump"),
            OriginStrategy::Rendezvous => write!(f, "rendezvous"),
        }
    }
}

impl std::str::FromStr for OriginStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jump" => Ok(OriginStrategy::Jump),
            "rendezvous" => Ok(OriginStrategy::Rendezvous),
            _ => Err(format!("Invalid origin strategy: {}", s)),
        }
    }
}
