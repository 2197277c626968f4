//! Receiving side of push-pull reconciliation.
use std::sync::Arc;

use tracing::{debug, warn};

use super::accuracy::AccuracyTracker;
use super::messages::{PushPullRequest, PushPullResponse, PushPullUpdate, WireEvent};
use super::NodeName;
use crate::limiters::Limiter;

/// Merges peers' events into the local counters and answers with the
/// corrected counts.
#[derive(Clone, Debug)]
pub struct PushPullService {
    limiter: Arc<Limiter>,
    accuracy: Arc<AccuracyTracker>,
}

impl PushPullService {
    pub fn new(limiter: Arc<Limiter>, accuracy: Arc<AccuracyTracker>) -> Self {
        Self { limiter, accuracy }
    }

    /// Process events in input order, one update per accepted event.
    /// Malformed events are skipped; the rest of the batch still completes.
    pub fn handle_push_pull(
        &self,
        from_peer: &NodeName,
        events: Vec<WireEvent>,
        now: i64,
    ) -> Vec<PushPullUpdate> {
        let mut updates = Vec::with_capacity(events.len());
        for wire_event in events {
            let event = match wire_event.into_event(from_peer) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        "[{}] Skipping event from {}: {}",
                        self.limiter.node_name(),
                        from_peer,
                        e
                    );
                    self.accuracy.record_rejected();
                    continue;
                }
            };
            let report = self.limiter.merge_event(&event, now);
            self.accuracy.record(event.pass, report.local_would_pass);
            debug!(
                "[{}] merged '{}' from {}: {} -> {} ({:?})",
                self.limiter.node_name(),
                event.identifier,
                from_peer,
                report.before,
                report.current,
                report.outcome
            );
            updates.push(PushPullUpdate {
                identifier: event.identifier,
                current: report.current,
                window_start_ms: report.window_start_ms,
            });
        }
        updates
    }

    pub fn handle_request(&self, request: PushPullRequest, now: i64) -> PushPullResponse {
        let from_peer = NodeName::from(request.origin);
        PushPullResponse {
            updates: self.handle_push_pull(&from_peer, request.events, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn service() -> (PushPullService, Arc<Limiter>, Arc<AccuracyTracker>) {
        let limiter = Arc::new(Limiter::new(NodeName::from("http://node-a:8410")));
        let accuracy = Arc::new(AccuracyTracker::new());
        (
            PushPullService::new(limiter.clone(), accuracy.clone()),
            limiter,
            accuracy,
        )
    }

    fn wire(identifier: &str, duration_ms: u64, cost: u64, pass: bool, current: u64) -> WireEvent {
        WireEvent {
            identifier: identifier.to_string(),
            limit: 10,
            duration_ms,
            cost,
            pass,
            current,
            timestamp_ms: 50,
            window_start_ms: Some(0),
        }
    }

    #[test]
    fn malformed_event_is_skipped() {
        let (service, _limiter, accuracy) = service();
        let from = NodeName::from("http://node-b:8410");
        let events = vec![
            wire("a", 1000, 1, true, 1),
            wire("b", 0, 1, true, 1),
            wire("c", 1000, 1, true, 1),
        ];
        let updates = service.handle_push_pull(&from, events, 100);
        let ids: Vec<&str> = updates.iter().map(|u| u.identifier.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(accuracy.stats().rejected, 1);
        assert_eq!(accuracy.stats().agreements, 2);
    }

    #[test]
    fn origin_keeps_its_larger_count() {
        let (service, limiter, _accuracy) = service();
        limiter.take("k", 10, Duration::from_millis(1000), 8, 0);
        let from = NodeName::from("http://node-b:8410");
        let updates = service.handle_push_pull(&from, vec![wire("k", 1000, 6, true, 6)], 100);
        assert_eq!(updates[0].current, 8);
        assert_eq!(updates[0].window_start_ms, 0);
    }

    #[test]
    fn equal_counts_stay_put() {
        let (service, limiter, _accuracy) = service();
        limiter.take("k", 10, Duration::from_millis(1000), 6, 0);
        let from = NodeName::from("http://node-b:8410");
        let updates = service.handle_push_pull(&from, vec![wire("k", 1000, 6, true, 6)], 100);
        assert_eq!(updates[0].current, 6);
    }

    #[test]
    fn disagreement_is_counted_before_merge() {
        let (service, limiter, accuracy) = service();
        limiter.take("k", 10, Duration::from_millis(1000), 8, 0);
        let from = NodeName::from("http://node-b:8410");
        // sender admitted cost 6; locally 8 + 6 > 10 would have been denied
        service.handle_push_pull(&from, vec![wire("k", 1000, 6, true, 6)], 100);
        let stats = accuracy.stats();
        assert_eq!(stats.disagreements, 1);
        assert_eq!(stats.agreements, 0);
    }

    #[test]
    fn request_wrapper_uses_origin_field() {
        let (service, limiter, _accuracy) = service();
        let request = PushPullRequest {
            origin: "http://node-b:8410".to_string(),
            events: vec![wire("k", 1000, 3, true, 3)],
        };
        let response = service.handle_request(request, 100);
        assert_eq!(response.updates.len(), 1);
        assert_eq!(limiter.current("k", 100), 3);
    }
}
