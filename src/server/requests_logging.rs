//! Request logging middleware

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, warn};

use super::state::ServerState;

#[derive(PartialEq, PartialOrd, Clone, Copy, Debug, Default, clap::ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    #[default]
    Path,
    Headers,
}

impl std::fmt::Display for RequestsLoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub async fn log_requests(
    State(state): State<ServerState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let level = state.config.requests_logging_level;
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    if level > RequestsLoggingLevel::None {
        info!(">>> {} {}", method, uri);
    }
    if level >= RequestsLoggingLevel::Headers {
        for (name, value) in request.headers() {
            info!("    {:?}: {:?}", name, value);
        }
    }

    let response = next.run(request).await;

    if level > RequestsLoggingLevel::None {
        let status = response.status();
        let elapsed = start.elapsed();
        if status.is_server_error() {
            warn!("<<< {} {} {} ({:?})", status.as_u16(), method, uri, elapsed);
        } else {
            info!("<<< {} {} {} ({:?})", status.as_u16(), method, uri, elapsed);
        }
    }
    response
}
