//! CLI for this application
//!
use url::Url;

use crate::node::origin::OriginStrategy;
use crate::settings;

#[derive(Clone, Debug, clap::Parser)]
#[clap(name = settings::APP_NAME, version = settings::APP_VERSION)]
pub struct Cli {
    // Server listen address
    #[clap(
        long,
        default_value = "0.0.0.0",
        env("PUSHPULL_LISTEN_ADDRESS"),
        help = "IP Address to listen on"
    )]
    pub listen_address: String,

    // HTTP API listen port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_HTTP,
        env("PUSHPULL_LISTEN_PORT"),
        help = "Port to bind the HTTP API server to"
    )]
    pub listen_port: u16,

    #[clap(
        long,
        env("PUSHPULL_NODE_NAME"),
        help = "URL other nodes use to reach this one (default: http://{listen_address}:{listen_port})"
    )]
    pub node_name: Option<String>,

    // Cluster configuration information: topology
    #[clap(
        long,
        env("PUSHPULL_TOPOLOGY"),
        value_delimiter = ',',
        help = "Peer base URLs (e.g., http://node1:8410,http://node2:8410). If empty, runs as a single node."
    )]
    pub topology: Vec<Url>,

    #[clap(
        long,
        default_value = "50",
        env("PUSHPULL_FLUSH_INTERVAL_MS"),
        help = "Milliseconds between pushes of buffered events"
    )]
    pub flush_interval_ms: u64,

    #[clap(
        long,
        default_value = "500",
        env("PUSHPULL_MAX_BATCH_SIZE"),
        help = "Max events per push-pull call"
    )]
    pub max_batch_size: usize,

    #[clap(
        long,
        default_value = "10000",
        env("PUSHPULL_MAX_BUFFER_PER_PEER"),
        help = "Max buffered events per peer before the oldest are dropped"
    )]
    pub max_buffer_per_peer: usize,

    #[clap(
        long,
        default_value = "1000",
        env("PUSHPULL_PUSH_TIMEOUT_MS"),
        help = "Deadline for one push-pull call"
    )]
    pub push_timeout_ms: u64,

    #[clap(
        long,
        default_value = "100",
        env("PUSHPULL_BACKOFF_BASE_MS"),
        help = "First retry delay after a failed push"
    )]
    pub backoff_base_ms: u64,

    #[clap(
        long,
        default_value = "10000",
        env("PUSHPULL_BACKOFF_MAX_MS"),
        help = "Upper bound on retry delay"
    )]
    pub backoff_max_ms: u64,

    #[clap(
        long,
        default_value = "60",
        env("PUSHPULL_EXPIRE_INTERVAL_SECS"),
        help = "Seconds between sweeps of stale counters"
    )]
    pub expire_interval_secs: u64,

    #[clap(
        long,
        default_value = "jump",
        env("PUSHPULL_ORIGIN_STRATEGY"),
        help = "origin-strategy: 'jump' or 'rendezvous'"
    )]
    pub origin_strategy: OriginStrategy,
}

impl Cli {
    pub fn into_settings(self) -> settings::Settings {
        settings::Settings {
            listen_address: self.listen_address,
            listen_port: self.listen_port,
            node_name: self.node_name,
            topology: self.topology,
            flush_interval_ms: self.flush_interval_ms,
            max_batch_size: self.max_batch_size,
            max_buffer_per_peer: self.max_buffer_per_peer,
            push_timeout_ms: self.push_timeout_ms,
            backoff_base_ms: self.backoff_base_ms,
            backoff_max_ms: self.backoff_max_ms,
            expire_interval_secs: self.expire_interval_secs,
            origin_strategy: self.origin_strategy,
        }
    }
}
