use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pushpull_limiter::api;
use pushpull_limiter::cli;
use pushpull_limiter::metrics;
use pushpull_limiter::node::RatelimitNode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pushpull_limiter=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    metrics::init_metrics();

    // Parse args and env vars
    let settings = cli::Cli::parse().into_settings();
    // Socket server listen address setup
    let listen_address: IpAddr = settings
        .listen_address
        .parse::<IpAddr>()
        .with_context(|| format!("Invalid ip address: {}", settings.listen_address))?;
    let socket_address = SocketAddr::from((listen_address, settings.listen_port));

    let node = Arc::new(RatelimitNode::new(&settings)?);
    let reconciler_loop = node.start()?;

    // Build Axum Router
    let api = api::api(node.clone());

    // Start server
    info!("Starting pushpull-limiter on {} as {}", socket_address, node.name());
    let listener = tokio::net::TcpListener::bind(socket_address).await?;
    axum::serve(listener, api)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    node.shutdown().await?;
    reconciler_loop.await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
