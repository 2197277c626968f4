//! A rate limiting node: local admission plus push-pull reconciliation
//! with the rest of the cluster.
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

pub mod accuracy;
pub mod messages;
pub mod node_name;
pub mod origin;
pub mod peers;
pub mod reconciler;
pub mod service;

use crate::error::{RatelimitError, Result};
use crate::limiters::{CounterSnapshot, Event, Limiter};
use crate::settings::Settings;
use crate::transport::{HttpPushPullClient, PushPullClient};
pub use accuracy::{AccuracyStats, AccuracyTracker};
pub use messages::{PushPullRequest, PushPullResponse, TakeRequest, TakeResponse};
pub use node_name::NodeName;
pub use origin::{OriginSelector, OriginStrategy};
pub use peers::{PeerProvider, PeerSet, StaticPeers};
pub use reconciler::{FrozenReconcilerStats, Reconciler, ReconcilerCommand, ReconcilerSettings};
pub use service::PushPullService;

/// Wall clock in milliseconds since the epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NodeStats {
    pub node_name: String,
    pub counters: usize,
    pub peers: Vec<String>,
    pub accuracy: AccuracyStats,
    pub reconciler: FrozenReconcilerStats,
}

#[derive(Debug)]
pub struct RatelimitNode {
    name: NodeName,
    limiter: Arc<Limiter>,
    accuracy: Arc<AccuracyTracker>,
    service: PushPullService,
    peers: Arc<StaticPeers>,
    reconciler: Arc<Reconciler>,
    command_rx: Mutex<Option<mpsc::Receiver<ReconcilerCommand>>>,
}

impl RatelimitNode {
    pub fn new(settings: &Settings) -> Result<Self> {
        let name = settings.node_name()?;
        let peers = Arc::new(StaticPeers::new(name.clone(), settings.peers()?));
        info!(
            "[{}] Starting with {} cluster members, {} origin selection",
            name,
            peers.snapshot().len(),
            settings.origin_strategy
        );
        Ok(Self::with_client(
            name,
            peers,
            settings.origin_strategy.selector(),
            settings.reconciler_settings(),
            Arc::new(HttpPushPullClient::new()),
        ))
    }

    /// Assemble a node around any transport
    pub fn with_client(
        name: NodeName,
        peers: Arc<StaticPeers>,
        selector: Arc<dyn OriginSelector>,
        reconciler_settings: ReconcilerSettings,
        client: Arc<dyn PushPullClient>,
    ) -> Self {
        let limiter = Arc::new(Limiter::new(name.clone()));
        let accuracy = Arc::new(AccuracyTracker::new());
        let service = PushPullService::new(limiter.clone(), accuracy.clone());
        let (reconciler, command_rx) = Reconciler::new(
            name.clone(),
            reconciler_settings,
            limiter.clone(),
            peers.clone(),
            selector,
            client,
        );
        Self {
            name,
            limiter,
            accuracy,
            service,
            peers,
            reconciler: Arc::new(reconciler),
            command_rx: Mutex::new(Some(command_rx)),
        }
    }

    pub fn name(&self) -> &NodeName {
        &self.name
    }

    pub fn peers(&self) -> &Arc<StaticPeers> {
        &self.peers
    }

    pub fn limiter(&self) -> &Arc<Limiter> {
        &self.limiter
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn service(&self) -> &PushPullService {
        &self.service
    }

    pub fn take(&self, request: &TakeRequest) -> Result<Event> {
        self.take_at(request, now_ms())
    }

    /// Decide locally, then queue the decision for the identifier's origin
    /// when that is another node.
    pub fn take_at(&self, request: &TakeRequest, now: i64) -> Result<Event> {
        let spec = request.validate()?;
        let event = self
            .limiter
            .take(&request.identifier, spec.limit, spec.duration, request.cost, now);
        self.reconciler.route(&event);
        Ok(event)
    }

    pub fn check(&self, identifier: &str) -> Option<CounterSnapshot> {
        self.limiter.snapshot(identifier, now_ms())
    }

    pub fn handle_push_pull(&self, request: PushPullRequest) -> PushPullResponse {
        self.service.handle_request(request, now_ms())
    }

    pub fn expire_keys(&self) -> usize {
        self.limiter.expire_keys(now_ms())
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            node_name: self.name.to_string(),
            counters: self.limiter.len(),
            peers: self
                .peers
                .snapshot()
                .members()
                .iter()
                .map(|p| p.to_string())
                .collect(),
            accuracy: self.accuracy.stats(),
            reconciler: self.reconciler.stats(),
        }
    }

    /// Spawn the reconciler loop. A node can only be started once.
    pub fn start(&self) -> Result<JoinHandle<()>> {
        let command_rx = self
            .command_rx
            .lock()
            .map_err(|e| RatelimitError::Concurrency(format!("Mutex lock fail {}", e)))?
            .take()
            .ok_or_else(|| RatelimitError::Concurrency("node already started".to_string()))?;
        let reconciler = self.reconciler.clone();
        Ok(tokio::spawn(async move { reconciler.start(command_rx).await }))
    }

    /// Final flush, then stop the reconciler loop
    pub async fn shutdown(&self) -> Result<()> {
        info!("[{}] Shutting down", self.name);
        self.reconciler.shutdown().await
    }
}
