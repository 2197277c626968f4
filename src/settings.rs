//! Application settings
use std::time::Duration;

use url::Url;

use crate::error::Result;
use crate::node::origin::OriginStrategy;
use crate::node::reconciler::ReconcilerSettings;
use crate::node::NodeName;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STANDARD_PORT_HTTP: u16 = 8410;
pub const DEFAULT_PORT_HTTP: &str = "8410";

#[derive(Clone, Debug)]
pub struct Settings {
    // Server listen address
    pub listen_address: String,

    // HTTP API listen port
    pub listen_port: u16,

    // URL peers use to reach this node; derived from the listen address if unset
    pub node_name: Option<String>,

    // Cluster configuration information: peer base URLs
    pub topology: Vec<Url>,

    // Reconciliation
    pub flush_interval_ms: u64,
    pub max_batch_size: usize,
    pub max_buffer_per_peer: usize,
    pub push_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,

    // Seconds between sweeps of stale counters
    pub expire_interval_secs: u64,

    pub origin_strategy: OriginStrategy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            listen_port: STANDARD_PORT_HTTP,
            node_name: None,
            topology: Vec::new(),
            flush_interval_ms: 50,
            max_batch_size: 500,
            max_buffer_per_peer: 10_000,
            push_timeout_ms: 1000,
            backoff_base_ms: 100,
            backoff_max_ms: 10_000,
            expire_interval_secs: 60,
            origin_strategy: OriginStrategy::default(),
        }
    }
}

impl Settings {
    pub fn node_name(&self) -> Result<NodeName> {
        let url = match &self.node_name {
            Some(name) => Url::parse(name)?,
            None => Url::parse(&format!(
                "http://{}:{}",
                self.listen_address, self.listen_port
            ))?,
        };
        NodeName::from_url(&url)
    }

    /// Every configured peer; may or may not include this node
    pub fn peers(&self) -> Result<Vec<NodeName>> {
        self.topology.iter().map(NodeName::from_url).collect()
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            flush_interval: Duration::from_millis(self.flush_interval_ms.max(1)),
            max_batch_size: self.max_batch_size.max(1),
            max_buffer_per_peer: self.max_buffer_per_peer.max(1),
            push_timeout: Duration::from_millis(self.push_timeout_ms.max(1)),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms)),
            expire_interval: Duration::from_secs(self.expire_interval_secs.max(1)),
        }
    }
}
