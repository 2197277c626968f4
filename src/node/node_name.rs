use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;
use crate::config_error;

/// Unique identifier for cluster nodes: the base URL peers use to reach it
#[derive(
    Clone, Debug, Default, Deserialize, Serialize, PartialEq, PartialOrd, Ord, Eq, Hash,
)]
pub struct NodeName(String);

impl NodeName {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    /// Normalize a peer URL into a node name (no trailing slash)
    pub fn from_url(url: &Url) -> Result<Self> {
        if url.host_str().is_none() {
            return Err(config_error!("peer url '{}' has no host", url));
        }
        Ok(Self(url.as_str().trim_end_matches('/').to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full URL for a path on this node
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.0, path)
    }
}

/// Hash that does not depend on process, platform or compiler version.
pub fn stable_hash(bytes: &[u8]) -> u64 {
    let digest = blake3::hash(bytes);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(buf)
}

impl From<&str> for NodeName {
    fn from(id: &str) -> Self {
        NodeName::new(id.to_string())
    }
}

impl From<String> for NodeName {
    fn from(id: String) -> Self {
        NodeName::new(id)
    }
}

impl std::fmt::Display for NodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_url_strips_trailing_slash() {
        let url = Url::parse("http://10.0.0.1:8410/").unwrap();
        let name = NodeName::from_url(&url).unwrap();
        assert_eq!(name.as_str(), "http://10.0.0.1:8410");
        assert_eq!(
            name.endpoint("/v1/ratelimit.pushpull"),
            "http://10.0.0.1:8410/v1/ratelimit.pushpull"
        );
    }

    #[test]
    fn stable_hash_is_deterministic() {
        let a = NodeName::from("http://node-a:8410");
        let b = NodeName::from("http://node-b:8410");
        assert_eq!(stable_hash(a.as_str().as_bytes()), stable_hash(b"http://node-a:8410"));
        assert_ne!(stable_hash(a.as_str().as_bytes()), stable_hash(b.as_str().as_bytes()));
    }
}
