//! Outbound side of push-pull reconciliation.
//!
//! Events decided locally for identifiers owned by another node are buffered
//! per origin peer and pushed in batches. Each push returns the origin's
//! corrected counts, which are max-merged back into the local limiter.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use super::messages::{PushPullRequest, PushPullResponse};
use super::origin::OriginSelector;
use super::peers::{PeerProvider, PeerSet};
use super::{now_ms, NodeName};
use crate::error::{RatelimitError, Result};
use crate::limiters::{Event, Limiter};
use crate::metrics;
use crate::transport::PushPullClient;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerSettings {
    pub flush_interval: Duration,
    pub max_batch_size: usize,
    pub max_buffer_per_peer: usize,
    pub push_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub expire_interval: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(50),
            max_batch_size: 500,
            max_buffer_per_peer: 10_000,
            push_timeout: Duration::from_millis(1000),
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(10_000),
            expire_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
pub enum ReconcilerCommand {
    FlushNow,
    ExpireKeys,
    /// Flush once more, then stop the loop and acknowledge
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct PeerQueue {
    events: VecDeque<Event>,
    consecutive_failures: u32,
    /// Earliest time the next push may start
    next_attempt: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct ReconcilerStats {
    pub events_enqueued: AtomicU64,
    pub events_pushed: AtomicU64,
    pub events_dropped: AtomicU64,
    pub events_rerouted: AtomicU64,
    pub push_failures: AtomicU64,
    pub updates_applied: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PeerQueueStats {
    pub peer: String,
    pub depth: usize,
    pub consecutive_failures: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FrozenReconcilerStats {
    pub events_enqueued: u64,
    pub events_pushed: u64,
    pub events_dropped: u64,
    pub events_rerouted: u64,
    pub push_failures: u64,
    pub updates_applied: u64,
    pub queues: Vec<PeerQueueStats>,
}

/// What one flush cycle did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub batches_sent: usize,
    pub batches_failed: usize,
    pub events_pushed: usize,
    pub updates_applied: usize,
}

pub struct Reconciler {
    node_name: NodeName,
    settings: ReconcilerSettings,
    limiter: Arc<Limiter>,
    peers: Arc<dyn PeerProvider>,
    selector: Arc<dyn OriginSelector>,
    client: Arc<dyn PushPullClient>,
    queues: DashMap<NodeName, PeerQueue>,
    command_tx: mpsc::Sender<ReconcilerCommand>,
    stats: ReconcilerStats,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("node_name", &self.node_name)
            .field("settings", &self.settings)
            .field("queued_peers", &self.queues.len())
            .finish()
    }
}

impl Reconciler {
    /// Build a reconciler along with the receiving end of its command channel,
    /// to be handed to `start`.
    pub fn new(
        node_name: NodeName,
        settings: ReconcilerSettings,
        limiter: Arc<Limiter>,
        peers: Arc<dyn PeerProvider>,
        selector: Arc<dyn OriginSelector>,
        client: Arc<dyn PushPullClient>,
    ) -> (Self, mpsc::Receiver<ReconcilerCommand>) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let reconciler = Self {
            node_name,
            settings,
            limiter,
            peers,
            selector,
            client,
            queues: DashMap::new(),
            command_tx,
            stats: ReconcilerStats::default(),
        };
        (reconciler, command_rx)
    }

    pub fn node_name(&self) -> &NodeName {
        &self.node_name
    }

    pub fn command_sender(&self) -> mpsc::Sender<ReconcilerCommand> {
        self.command_tx.clone()
    }

    /// Origin for an identifier under the current peer set
    pub fn origin_for(&self, identifier: &str) -> Option<NodeName> {
        let peers = self.peers.snapshot();
        self.selector.origin(identifier, &peers).cloned()
    }

    /// Queue an event for its origin. Returns false when this node is the
    /// origin (nothing to send).
    pub fn route(&self, event: &Event) -> bool {
        match self.origin_for(&event.identifier) {
            Some(origin) if origin != self.node_name => {
                if let Err(e) = self.enqueue(origin, event.clone()) {
                    warn!("[{}] {}", self.node_name, e);
                }
                true
            }
            _ => false,
        }
    }

    /// Buffer an event for `peer`, evicting the oldest when the queue is full.
    /// Never blocks on the network. The new event is always queued; an
    /// eviction is reported as `CapacityExceeded` after it is counted.
    pub fn enqueue(&self, peer: NodeName, event: Event) -> Result<()> {
        let (dropped, batch_ready) = {
            let mut queue = self.queues.entry(peer.clone()).or_default();
            queue.events.push_back(event);
            let dropped = Self::evict_overflow(&mut queue, self.settings.max_buffer_per_peer);
            (dropped, queue.events.len() >= self.settings.max_batch_size)
        };
        self.stats.events_enqueued.fetch_add(1, Ordering::Relaxed);
        if batch_ready {
            // a full channel means a flush is already on its way
            let _ = self.command_tx.try_send(ReconcilerCommand::FlushNow);
        }
        if dropped > 0 {
            return Err(self.record_dropped(&peer, dropped));
        }
        Ok(())
    }

    fn evict_overflow(queue: &mut PeerQueue, capacity: usize) -> usize {
        let overflow = queue.events.len().saturating_sub(capacity);
        queue.events.drain(..overflow);
        overflow
    }

    fn record_dropped(&self, peer: &NodeName, dropped: usize) -> RatelimitError {
        self.stats
            .events_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
        metrics::record_dropped(peer.as_str(), dropped as u64);
        RatelimitError::CapacityExceeded(format!(
            "outbound queue for {} full, dropped {} oldest events",
            peer, dropped
        ))
    }

    pub fn queue_depth(&self, peer: &NodeName) -> usize {
        self.queues.get(peer).map(|q| q.events.len()).unwrap_or(0)
    }

    /// Delay before the next attempt after `failures` consecutive failures
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let base = self
            .settings
            .backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.settings.backoff_max);
        let jitter_ms = base.as_millis() as u64 / 10;
        let jitter = if jitter_ms > 0 {
            rand::rng().random_range(0..=jitter_ms)
        } else {
            0
        };
        base + Duration::from_millis(jitter)
    }

    /// Move events queued for peers that left the cluster to the new origin
    fn reroute_departed(&self, peers: &PeerSet) {
        let departed: Vec<NodeName> = self
            .queues
            .iter()
            .filter(|entry| !peers.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        for peer in departed {
            let Some((_, queue)) = self.queues.remove(&peer) else {
                continue;
            };
            info!(
                "[{}] {} left the cluster, re-routing {} queued events",
                self.node_name,
                peer,
                queue.events.len()
            );
            for event in queue.events {
                match self.selector.origin(&event.identifier, peers) {
                    Some(origin) if *origin != self.node_name => {
                        self.stats.events_rerouted.fetch_add(1, Ordering::Relaxed);
                        let origin = origin.clone();
                        let mut target = self.queues.entry(origin).or_default();
                        target.events.push_back(event);
                    }
                    _ => {
                        // we own the identifier now; our counter already holds the cost
                        debug!(
                            "[{}] Dropping re-routed event for '{}', now local",
                            self.node_name, event.identifier
                        );
                    }
                }
            }
        }

        let capacity = self.settings.max_buffer_per_peer;
        let overflowing: Vec<(NodeName, usize)> = self
            .queues
            .iter_mut()
            .filter_map(|mut entry| {
                let dropped = Self::evict_overflow(entry.value_mut(), capacity);
                (dropped > 0).then(|| (entry.key().clone(), dropped))
            })
            .collect();
        for (peer, dropped) in overflowing {
            let e = self.record_dropped(&peer, dropped);
            warn!("[{}] {}", self.node_name, e);
        }
    }

    /// Take up to one batch from every peer that is due
    fn drain_ready_batches(&self, now: Instant) -> Vec<(NodeName, Vec<Event>)> {
        let max_batch = self.settings.max_batch_size.max(1);
        self.queues
            .iter_mut()
            .filter_map(|mut entry| {
                let queue = entry.value_mut();
                if queue.events.is_empty() || queue.next_attempt.is_some_and(|at| at > now) {
                    return None;
                }
                let take = queue.events.len().min(max_batch);
                let batch: Vec<Event> = queue.events.drain(..take).collect();
                Some((entry.key().clone(), batch))
            })
            .collect()
    }

    /// Push one batch to every peer that has events and is not backing off.
    /// Pushes run concurrently, each bounded by the push timeout.
    pub async fn flush(&self) -> FlushSummary {
        let peers = self.peers.snapshot();
        self.reroute_departed(&peers);

        let batches = self.drain_ready_batches(Instant::now());
        let mut summary = FlushSummary::default();
        if batches.is_empty() {
            return summary;
        }

        let mut pushes = JoinSet::new();
        for (peer, batch) in batches {
            let client = self.client.clone();
            let request = PushPullRequest::new(&self.node_name, &batch);
            let deadline = self.settings.push_timeout;
            pushes.spawn(async move {
                let started = Instant::now();
                let push = client.push_pull(&peer, &request, deadline);
                let result = match time::timeout(deadline, push).await {
                    Ok(result) => result,
                    Err(elapsed) => Err(elapsed.into()),
                };
                (peer, batch, started.elapsed(), result)
            });
        }

        while let Some(joined) = pushes.join_next().await {
            let (peer, batch, elapsed, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    // the batch is lost with the task
                    error!("[{}] Push task failed: {}", self.node_name, e);
                    summary.batches_failed += 1;
                    continue;
                }
            };
            metrics::record_push_duration(peer.as_str(), elapsed);
            match result {
                Ok(response) => {
                    summary.batches_sent += 1;
                    summary.events_pushed += batch.len();
                    summary.updates_applied += self.on_push_success(&peer, batch.len(), response);
                }
                Err(e) => {
                    summary.batches_failed += 1;
                    self.on_push_failure(&peer, batch, &e.to_string());
                }
            }
        }
        summary
    }

    fn on_push_success(&self, peer: &NodeName, pushed: usize, response: PushPullResponse) -> usize {
        if let Some(mut queue) = self.queues.get_mut(peer) {
            queue.consecutive_failures = 0;
            queue.next_attempt = None;
        }
        self.stats
            .events_pushed
            .fetch_add(pushed as u64, Ordering::Relaxed);

        let now = now_ms();
        let applied = response
            .updates
            .into_iter()
            .filter_map(|update| {
                self.limiter.apply_update(
                    &update.identifier,
                    update.current,
                    Some(update.window_start_ms),
                    now,
                )
            })
            .count();
        self.stats
            .updates_applied
            .fetch_add(applied as u64, Ordering::Relaxed);
        debug!(
            "[{}] Pushed {} events to {}, applied {} updates",
            self.node_name, pushed, peer, applied
        );
        applied
    }

    fn on_push_failure(&self, peer: &NodeName, batch: Vec<Event>, reason: &str) {
        self.stats.push_failures.fetch_add(1, Ordering::Relaxed);
        metrics::record_push_failure(peer.as_str());

        let dropped = {
            let mut queue = self.queues.entry(peer.clone()).or_default();
            for event in batch.into_iter().rev() {
                queue.events.push_front(event);
            }
            queue.consecutive_failures = queue.consecutive_failures.saturating_add(1);
            let delay = self.backoff(queue.consecutive_failures);
            queue.next_attempt = Some(Instant::now() + delay);
            error!(
                "[{}] Push to {} failed ({} in a row), retrying in {:?}: {}",
                self.node_name, peer, queue.consecutive_failures, delay, reason
            );
            Self::evict_overflow(&mut queue, self.settings.max_buffer_per_peer)
        };
        if dropped > 0 {
            let e = self.record_dropped(peer, dropped);
            warn!("[{}] {}", self.node_name, e);
        }
    }

    pub fn stats(&self) -> FrozenReconcilerStats {
        let mut queues: Vec<PeerQueueStats> = self
            .queues
            .iter()
            .map(|entry| PeerQueueStats {
                peer: entry.key().to_string(),
                depth: entry.events.len(),
                consecutive_failures: entry.consecutive_failures,
            })
            .collect();
        queues.sort_by(|a, b| a.peer.cmp(&b.peer));
        FrozenReconcilerStats {
            events_enqueued: self.stats.events_enqueued.load(Ordering::Relaxed),
            events_pushed: self.stats.events_pushed.load(Ordering::Relaxed),
            events_dropped: self.stats.events_dropped.load(Ordering::Relaxed),
            events_rerouted: self.stats.events_rerouted.load(Ordering::Relaxed),
            push_failures: self.stats.push_failures.load(Ordering::Relaxed),
            updates_applied: self.stats.updates_applied.load(Ordering::Relaxed),
            queues,
        }
    }

    /// Flush timer, expiry timer and commands in one loop
    pub async fn start(&self, mut command_rx: mpsc::Receiver<ReconcilerCommand>) {
        info!(
            "[{}] Starting reconciler loop with {:?} flush interval",
            self.node_name, self.settings.flush_interval
        );
        let mut flush_timer = time::interval(self.settings.flush_interval);
        flush_timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut expire_timer = time::interval(self.settings.expire_interval);
        expire_timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    match cmd {
                        ReconcilerCommand::FlushNow => {
                            self.flush().await;
                        }
                        ReconcilerCommand::ExpireKeys => {
                            self.limiter.expire_keys(now_ms());
                        }
                        ReconcilerCommand::Shutdown(ack) => {
                            let summary = self.flush().await;
                            info!(
                                "[{}] Reconciler stopping after final flush: {:?}",
                                self.node_name, summary
                            );
                            let _ = ack.send(());
                            break;
                        }
                    }
                }
                _ = flush_timer.tick() => {
                    self.flush().await;
                }
                _ = expire_timer.tick() => {
                    self.limiter.expire_keys(now_ms());
                }
                else => {
                    info!("[{}] Reconciler command channel closed, exiting", self.node_name);
                    break;
                }
            }
        }
    }

    /// Ask a running loop to flush and stop; waits for the final flush.
    pub async fn shutdown(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.command_tx
            .send(ReconcilerCommand::Shutdown(ack_tx))
            .await
            .map_err(|e| RatelimitError::Concurrency(format!("reconciler gone: {}", e)))?;
        ack_rx
            .await
            .map_err(|e| RatelimitError::Concurrency(format!("no shutdown ack: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::node::messages::PushPullUpdate;
    use crate::node::origin::JumpHashSelector;
    use crate::node::peers::StaticPeers;
    use crate::transport_error;

    /// Answers every event with a fixed count, fails while `failing` is set
    /// and never answers within the deadline while `hanging` is set
    #[derive(Debug, Default)]
    struct MockClient {
        failing: Mutex<bool>,
        hanging: bool,
        answer: u64,
        calls: AtomicUsize,
        received: Mutex<Vec<(NodeName, usize)>>,
    }

    #[async_trait]
    impl PushPullClient for MockClient {
        async fn push_pull(
            &self,
            peer: &NodeName,
            request: &PushPullRequest,
            deadline: Duration,
        ) -> Result<PushPullResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hanging {
                time::sleep(deadline * 2).await;
            }
            if *self.failing.lock().unwrap() {
                return Err(transport_error!("{} down", peer));
            }
            self.received
                .lock()
                .unwrap()
                .push((peer.clone(), request.events.len()));
            Ok(PushPullResponse {
                updates: request
                    .events
                    .iter()
                    .map(|e| PushPullUpdate {
                        identifier: e.identifier.clone(),
                        current: self.answer,
                        window_start_ms: e.window_start_ms.unwrap_or_default(),
                    })
                    .collect(),
            })
        }
    }

    const A: &str = "http://node-a:8410";
    const B: &str = "http://node-b:8410";

    fn setup(
        settings: ReconcilerSettings,
        client: Arc<MockClient>,
    ) -> (Reconciler, Arc<Limiter>, Arc<StaticPeers>) {
        let a = NodeName::from(A);
        let limiter = Arc::new(Limiter::new(a.clone()));
        let peers = Arc::new(StaticPeers::new(a.clone(), vec![NodeName::from(B)]));
        let (reconciler, _rx) = Reconciler::new(
            a,
            settings,
            limiter.clone(),
            peers.clone(),
            Arc::new(JumpHashSelector),
            client,
        );
        (reconciler, limiter, peers)
    }

    /// An identifier whose origin is node B
    fn remote_identifier(reconciler: &Reconciler) -> String {
        (0..)
            .map(|i| format!("user:{}", i))
            .find(|id| reconciler.origin_for(id) == Some(NodeName::from(B)))
            .unwrap()
    }

    fn local_identifier(reconciler: &Reconciler) -> String {
        (0..)
            .map(|i| format!("user:{}", i))
            .find(|id| reconciler.origin_for(id) == Some(NodeName::from(A)))
            .unwrap()
    }

    #[tokio::test]
    async fn successful_push_applies_returned_counts() {
        let client = Arc::new(MockClient {
            answer: 7,
            ..Default::default()
        });
        let (reconciler, limiter, _peers) = setup(ReconcilerSettings::default(), client.clone());
        let id = remote_identifier(&reconciler);

        let event = limiter.take(&id, 10, Duration::from_secs(60), 2, now_ms());
        assert!(reconciler.route(&event));
        assert_eq!(reconciler.queue_depth(&NodeName::from(B)), 1);

        let summary = reconciler.flush().await;
        assert_eq!(summary.batches_sent, 1);
        assert_eq!(summary.updates_applied, 1);
        assert_eq!(reconciler.queue_depth(&NodeName::from(B)), 0);
        assert_eq!(limiter.current(&id, now_ms()), 7);
        assert_eq!(reconciler.stats().events_pushed, 1);
    }

    #[tokio::test]
    async fn local_origin_is_not_queued() {
        let client = Arc::new(MockClient::default());
        let (reconciler, limiter, _peers) = setup(ReconcilerSettings::default(), client);
        let id = local_identifier(&reconciler);
        let event = limiter.take(&id, 10, Duration::from_secs(60), 1, now_ms());
        assert!(!reconciler.route(&event));
        assert_eq!(reconciler.stats().events_enqueued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_push_requeues_with_backoff() {
        let client = Arc::new(MockClient::default());
        *client.failing.lock().unwrap() = true;
        let settings = ReconcilerSettings {
            backoff_base: Duration::from_secs(30),
            backoff_max: Duration::from_secs(60),
            ..Default::default()
        };
        let (reconciler, limiter, _peers) = setup(settings, client.clone());
        let id = remote_identifier(&reconciler);
        for _ in 0..3 {
            reconciler.route(&limiter.take(&id, 10, Duration::from_secs(60), 1, now_ms()));
        }

        let summary = reconciler.flush().await;
        assert_eq!(summary.batches_failed, 1);
        assert_eq!(reconciler.queue_depth(&NodeName::from(B)), 3);
        let stats = reconciler.stats();
        assert_eq!(stats.push_failures, 1);
        assert_eq!(stats.queues[0].consecutive_failures, 1);

        // still backing off: no call is made
        *client.failing.lock().unwrap() = false;
        let summary = reconciler.flush().await;
        assert_eq!(summary, FlushSummary::default());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        // 30s base plus at most 10% jitter
        time::advance(Duration::from_secs(34)).await;
        let summary = reconciler.flush().await;
        assert_eq!(summary.batches_sent, 1);
        assert_eq!(summary.events_pushed, 3);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(reconciler.stats().queues[0].consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_push_times_out_and_requeues() {
        let client = Arc::new(MockClient {
            hanging: true,
            ..Default::default()
        });
        let settings = ReconcilerSettings {
            push_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let (reconciler, limiter, _peers) = setup(settings, client.clone());
        let id = remote_identifier(&reconciler);
        let first = limiter.take(&id, 10, Duration::from_secs(60), 1, now_ms());
        let second = limiter.take(&id, 10, Duration::from_secs(60), 1, now_ms());
        reconciler.route(&first);
        reconciler.route(&second);

        let started = Instant::now();
        let summary = reconciler.flush().await;
        assert_eq!(summary.batches_failed, 1);
        assert_eq!(summary.batches_sent, 0);
        // cut off at the push timeout, not the peer's 400ms
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(reconciler.stats().push_failures, 1);

        let queue = reconciler.queues.get(&NodeName::from(B)).unwrap();
        let queued: Vec<u64> = queue.events.iter().map(|e| e.current).collect();
        assert_eq!(queued, vec![first.current, second.current]);
    }

    #[tokio::test]
    async fn requeued_events_keep_their_order() {
        let client = Arc::new(MockClient::default());
        *client.failing.lock().unwrap() = true;
        let settings = ReconcilerSettings {
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(1),
            ..Default::default()
        };
        let (reconciler, limiter, _peers) = setup(settings, client.clone());
        let id = remote_identifier(&reconciler);
        let first = limiter.take(&id, 10, Duration::from_secs(60), 1, now_ms());
        let second = limiter.take(&id, 10, Duration::from_secs(60), 1, now_ms());
        reconciler.route(&first);
        reconciler.flush().await;
        reconciler.route(&second);

        let queue = reconciler.queues.get(&NodeName::from(B)).unwrap();
        let queued: Vec<u64> = queue.events.iter().map(|e| e.current).collect();
        assert_eq!(queued, vec![first.current, second.current]);
    }

    #[tokio::test]
    async fn full_queue_drops_oldest() {
        let client = Arc::new(MockClient::default());
        let settings = ReconcilerSettings {
            max_buffer_per_peer: 3,
            ..Default::default()
        };
        let (reconciler, limiter, _peers) = setup(settings, client);
        let id = remote_identifier(&reconciler);
        let b = NodeName::from(B);
        for _ in 0..3 {
            let event = limiter.take(&id, 10, Duration::from_secs(60), 1, now_ms());
            assert!(reconciler.enqueue(b.clone(), event).is_ok());
        }
        for _ in 0..2 {
            let event = limiter.take(&id, 10, Duration::from_secs(60), 1, now_ms());
            match reconciler.enqueue(b.clone(), event) {
                Err(RatelimitError::CapacityExceeded(_)) => {}
                other => panic!("expected capacity exceeded, got {:?}", other),
            }
        }
        assert_eq!(reconciler.queue_depth(&b), 3);
        assert_eq!(reconciler.stats().events_dropped, 2);
        let queue = reconciler.queues.get(&NodeName::from(B)).unwrap();
        let currents: Vec<u64> = queue.events.iter().map(|e| e.current).collect();
        assert_eq!(currents, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn batches_are_capped() {
        let client = Arc::new(MockClient::default());
        let settings = ReconcilerSettings {
            max_batch_size: 2,
            ..Default::default()
        };
        let (reconciler, limiter, _peers) = setup(settings, client.clone());
        let id = remote_identifier(&reconciler);
        for _ in 0..5 {
            reconciler.route(&limiter.take(&id, 10, Duration::from_secs(60), 1, now_ms()));
        }
        reconciler.flush().await;
        assert_eq!(reconciler.queue_depth(&NodeName::from(B)), 3);
        assert_eq!(client.received.lock().unwrap()[0].1, 2);
    }

    #[tokio::test]
    async fn departed_peer_events_are_dropped_when_we_become_origin() {
        let client = Arc::new(MockClient::default());
        let (reconciler, limiter, peers) = setup(ReconcilerSettings::default(), client.clone());
        let id = remote_identifier(&reconciler);
        reconciler.route(&limiter.take(&id, 10, Duration::from_secs(60), 1, now_ms()));

        peers.remove_peer(&NodeName::from(B));
        let summary = reconciler.flush().await;
        assert_eq!(summary.batches_sent, 0);
        assert_eq!(reconciler.queue_depth(&NodeName::from(B)), 0);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let client = Arc::new(MockClient::default());
        let settings = ReconcilerSettings {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(1000),
            ..Default::default()
        };
        let (reconciler, _limiter, _peers) = setup(settings, client);
        let within = |d: Duration, base: u64| {
            d >= Duration::from_millis(base) && d <= Duration::from_millis(base + base / 10)
        };
        assert!(within(reconciler.backoff(1), 100));
        assert!(within(reconciler.backoff(2), 200));
        assert!(within(reconciler.backoff(3), 400));
        assert!(within(reconciler.backoff(10), 1000));
        assert!(within(reconciler.backoff(u32::MAX), 1000));
    }

    #[tokio::test]
    async fn shutdown_flushes_and_stops_loop() {
        let client = Arc::new(MockClient::default());
        let a = NodeName::from(A);
        let limiter = Arc::new(Limiter::new(a.clone()));
        let peers = Arc::new(StaticPeers::new(a.clone(), vec![NodeName::from(B)]));
        let settings = ReconcilerSettings {
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let (reconciler, rx) = Reconciler::new(
            a,
            settings,
            limiter.clone(),
            peers,
            Arc::new(JumpHashSelector),
            client.clone(),
        );
        let reconciler = Arc::new(reconciler);
        let looping = reconciler.clone();
        let handle = tokio::spawn(async move { looping.start(rx).await });

        let id = remote_identifier(&reconciler);
        reconciler.route(&limiter.take(&id, 10, Duration::from_secs(60), 1, now_ms()));
        // a counter whose window closed long ago
        limiter.take("stale", 10, Duration::from_millis(10), 1, 0);
        reconciler
            .command_sender()
            .send(ReconcilerCommand::ExpireKeys)
            .await
            .unwrap();
        reconciler.shutdown().await.unwrap();
        handle.await.unwrap();
        assert_eq!(reconciler.queue_depth(&NodeName::from(B)), 0);
        assert_eq!(reconciler.stats().events_pushed, 1);
        assert_eq!(limiter.current("stale", now_ms()), 0);
        assert!(limiter.snapshot("stale", now_ms()).is_none());
    }

    /// Spawn a running loop for `settings` and let it take its first ticks
    async fn running(
        settings: ReconcilerSettings,
        client: Arc<MockClient>,
    ) -> (Arc<Reconciler>, Arc<Limiter>, tokio::task::JoinHandle<()>) {
        let a = NodeName::from(A);
        let limiter = Arc::new(Limiter::new(a.clone()));
        let peers = Arc::new(StaticPeers::new(a.clone(), vec![NodeName::from(B)]));
        let (reconciler, rx) = Reconciler::new(
            a,
            settings,
            limiter.clone(),
            peers,
            Arc::new(JumpHashSelector),
            client,
        );
        let reconciler = Arc::new(reconciler);
        let looping = reconciler.clone();
        let handle = tokio::spawn(async move { looping.start(rx).await });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        (reconciler, limiter, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_flushes_without_waiting_for_timer() {
        let client = Arc::new(MockClient::default());
        let settings = ReconcilerSettings {
            flush_interval: Duration::from_secs(3600),
            max_batch_size: 2,
            ..Default::default()
        };
        let started = Instant::now();
        let (reconciler, limiter, handle) = running(settings, client.clone()).await;
        let id = remote_identifier(&reconciler);

        reconciler.route(&limiter.take(&id, 10, Duration::from_secs(60), 1, now_ms()));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);

        reconciler.route(&limiter.take(&id, 10, Duration::from_secs(60), 1, now_ms()));
        for _ in 0..100 {
            if reconciler.stats().events_pushed == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(reconciler.stats().events_pushed, 2);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(3600));

        reconciler.shutdown().await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn expire_timer_drops_stale_counters() {
        let client = Arc::new(MockClient::default());
        let settings = ReconcilerSettings {
            flush_interval: Duration::from_secs(3600),
            expire_interval: Duration::from_secs(60),
            ..Default::default()
        };
        let (reconciler, limiter, handle) = running(settings, client).await;

        // a counter whose window closed long ago
        limiter.take("stale", 10, Duration::from_millis(10), 1, 0);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(limiter.len(), 1);

        time::advance(Duration::from_secs(61)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(limiter.is_empty());

        reconciler.shutdown().await.unwrap();
        handle.await.unwrap();
    }
}
