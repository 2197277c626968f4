use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::traits::PushPullClient;
use crate::api::paths;
use crate::error::Result;
use crate::node::messages::{PushPullRequest, PushPullResponse};
use crate::node::NodeName;
use crate::transport_error;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Push-pull over HTTP: a bincode body POSTed to the peer's pushpull route
#[derive(Clone, Debug, Default)]
pub struct HttpPushPullClient {
    client: reqwest::Client,
}

impl HttpPushPullClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PushPullClient for HttpPushPullClient {
    async fn push_pull(
        &self,
        peer: &NodeName,
        request: &PushPullRequest,
        deadline: Duration,
    ) -> Result<PushPullResponse> {
        let url = peer.endpoint(paths::PUSHPULL);
        let body = request.serialize()?;
        debug!("Pushing {} events to {}", request.events.len(), url);
        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, OCTET_STREAM)
            .timeout(deadline)
            .body(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(transport_error!("{} answered {}", peer, status));
        }
        let bytes = resp.bytes().await?;
        PushPullResponse::deserialize(&bytes)
    }
}
