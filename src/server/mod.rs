pub mod metrics;
mod requests_logging;
mod routes;
mod state;

pub use requests_logging::RequestsLoggingLevel;
pub use state::{ServerConfig, ServerState};

use anyhow::{Context, Result};
use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::Engine;

pub fn make_app(config: ServerConfig, engine: Arc<Engine>) -> Router {
    let state = ServerState { config, engine };
    routes::make_job_routes()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            requests_logging::log_requests,
        ))
        .with_state(state)
}

pub fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics::metrics_handler))
}

/// Serve the API and the Prometheus endpoint until `shutdown` fires.
pub async fn run_server(
    config: ServerConfig,
    engine: Arc<Engine>,
    shutdown: CancellationToken,
) -> Result<()> {
    let port = config.port;
    let metrics_port = config.metrics_port;

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind API port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(("0.0.0.0", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);

    let api = axum::serve(listener, make_app(config, engine))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let metrics = axum::serve(metrics_listener, make_metrics_app())
        .with_graceful_shutdown(shutdown.cancelled_owned());

    let (api, metrics) = tokio::join!(api, metrics);
    api.context("API server failed")?;
    metrics.context("Metrics server failed")?;
    Ok(())
}
