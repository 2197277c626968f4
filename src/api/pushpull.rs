use std::sync::Arc;

use axum::{body::Bytes, extract::State, http::header, response::IntoResponse};
use tracing::{event, instrument, Level};

use crate::error::Result;
use crate::node::{PushPullRequest, RatelimitNode};
use crate::transport::http::OCTET_STREAM;

#[instrument(skip(state, body), level = "debug")]
pub async fn push_pull(
    State(state): State<Arc<RatelimitNode>>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let request = PushPullRequest::deserialize(&body).map_err(|err| {
        event!(
            Level::WARN,
            message = "Undecodable push-pull body",
            err = format!("{:?}", err)
        );
        err
    })?;
    let response = state.handle_push_pull(request).serialize()?;
    Ok(([(header::CONTENT_TYPE, OCTET_STREAM)], response))
}
