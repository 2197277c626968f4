mod base;
mod pushpull;
mod rate_limits;

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    error_handling::HandleErrorLayer, http::StatusCode, response::IntoResponse, routing, Router,
};
use tokio::time::Duration;
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;

pub mod paths;

pub use base::AboutResponse;
pub use rate_limits::ExpireKeysResponse;

use crate::node::RatelimitNode;

/// Build the public and node-to-node routes around a running node
pub fn api(node: Arc<RatelimitNode>) -> Router {
    Router::new()
        .route(paths::base::ROOT, routing::get(base::root))
        .route(paths::base::HEALTH, routing::get(base::health))
        .route(paths::base::ABOUT, routing::get(base::about))
        .route(paths::rate_limits::TAKE, routing::post(rate_limits::take))
        .route(paths::rate_limits::CHECK, routing::get(rate_limits::check))
        .route(paths::rate_limits::STATS, routing::get(rate_limits::stats))
        .route(paths::EXPIRE_KEYS, routing::post(rate_limits::expire_keys))
        // Reconciliation between nodes
        .route(paths::PUSHPULL, routing::post(pushpull::push_pull))
        .layer(
            ServiceBuilder::new()
                // Handle errors from middleware
                .layer(HandleErrorLayer::new(handle_error))
                .load_shed()
                .timeout(Duration::from_secs(10)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

async fn handle_error(error: BoxError) -> impl IntoResponse {
    if error.is::<tower::timeout::error::Elapsed>() {
        return (StatusCode::REQUEST_TIMEOUT, Cow::from("request timed out"));
    }

    if error.is::<tower::load_shed::error::Overloaded>() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Cow::from("service is overloaded, try again later"),
        );
    }

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Cow::from(format!("Unhandled internal error: {}", error)),
    )
}
