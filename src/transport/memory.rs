use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::traits::PushPullClient;
use crate::error::Result;
use crate::node::messages::{PushPullRequest, PushPullResponse};
use crate::node::service::PushPullService;
use crate::node::{now_ms, NodeName};
use crate::transport_error;

/// Routes push-pull calls to services registered in this process.
///
/// Requests still pass through the wire encoding so a broken codec shows up
/// here too. A peer can be marked unreachable to simulate a partition.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    services: RwLock<HashMap<NodeName, PushPullService>>,
    unreachable: RwLock<HashSet<NodeName>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: NodeName, service: PushPullService) {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, service);
    }

    pub fn set_reachable(&self, name: &NodeName, reachable: bool) {
        let mut unreachable = self
            .unreachable
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if reachable {
            unreachable.remove(name);
        } else {
            unreachable.insert(name.clone());
        }
    }
}

#[async_trait]
impl PushPullClient for InMemoryTransport {
    async fn push_pull(
        &self,
        peer: &NodeName,
        request: &PushPullRequest,
        _deadline: Duration,
    ) -> Result<PushPullResponse> {
        if self
            .unreachable
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(peer)
        {
            return Err(transport_error!("{} is unreachable", peer));
        }
        let service = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .cloned()
            .ok_or_else(|| transport_error!("no route to {}", peer))?;

        let request = PushPullRequest::deserialize(&request.serialize()?)?;
        let response = service.handle_request(request, now_ms());
        PushPullResponse::deserialize(&response.serialize()?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::limiters::{Event, Limiter};
    use crate::node::accuracy::AccuracyTracker;

    #[tokio::test]
    async fn routes_to_registered_service() {
        let b = NodeName::from("http://node-b:8410");
        let limiter = Arc::new(Limiter::new(b.clone()));
        let service = PushPullService::new(limiter.clone(), Arc::new(AccuracyTracker::new()));
        let transport = InMemoryTransport::new();
        transport.register(b.clone(), service);

        let a = Limiter::new(NodeName::from("http://node-a:8410"));
        let event: Event = a.take("k", 10, Duration::from_secs(60), 4, now_ms());
        let request = PushPullRequest::new(a.node_name(), &[event]);

        let response = transport
            .push_pull(&b, &request, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.updates.len(), 1);
        assert_eq!(response.updates[0].current, 4);

        transport.set_reachable(&b, false);
        assert!(transport
            .push_pull(&b, &request, Duration::from_secs(1))
            .await
            .is_err());
        let unknown = NodeName::from("http://node-z:8410");
        assert!(transport
            .push_pull(&unknown, &request, Duration::from_secs(1))
            .await
            .is_err());
    }
}
