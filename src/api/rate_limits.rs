use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{event, instrument, Level};

use crate::error::{RatelimitError, Result};
use crate::limiters::CounterSnapshot;
use crate::node::{NodeStats, RatelimitNode, TakeRequest, TakeResponse};

/// 200 when admitted, 429 when denied; the body is the same either way
#[instrument(skip(state), level = "debug")]
pub async fn take(
    State(state): State<Arc<RatelimitNode>>,
    Json(request): Json<TakeRequest>,
) -> Result<(StatusCode, Json<TakeResponse>)> {
    let event = state.take(&request).map_err(|err| {
        event!(
            Level::DEBUG,
            message = "Rejected take request",
            err = format!("{:?}", err)
        );
        err
    })?;
    let status = if event.pass {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    Ok((status, Json(TakeResponse::from(&event))))
}

#[instrument(skip(state), level = "debug")]
pub async fn check(
    Path(identifier): Path<String>,
    State(state): State<Arc<RatelimitNode>>,
) -> Result<Json<CounterSnapshot>> {
    state
        .check(&identifier)
        .map(Json)
        .ok_or_else(|| RatelimitError::NotFound(format!("no counter for '{}'", identifier)))
}

#[instrument(skip(state), level = "debug")]
pub async fn stats(State(state): State<Arc<RatelimitNode>>) -> Json<NodeStats> {
    Json(state.stats())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExpireKeysResponse {
    pub removed: usize,
}

#[instrument(skip(state), level = "debug")]
pub async fn expire_keys(State(state): State<Arc<RatelimitNode>>) -> Json<ExpireKeysResponse> {
    Json(ExpireKeysResponse {
        removed: state.expire_keys(),
    })
}
