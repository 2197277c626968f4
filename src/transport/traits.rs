use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::node::messages::{PushPullRequest, PushPullResponse};
use crate::node::NodeName;

/// One push-pull round trip to a peer
#[async_trait]
pub trait PushPullClient: Send + Sync + std::fmt::Debug {
    /// Send a batch to `peer` and return its corrected counts.
    /// Implementations must give up after `deadline`.
    async fn push_pull(
        &self,
        peer: &NodeName,
        request: &PushPullRequest,
        deadline: Duration,
    ) -> Result<PushPullResponse>;
}
