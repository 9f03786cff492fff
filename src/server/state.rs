use axum::extract::FromRef;
use std::sync::Arc;

use super::requests_logging::RequestsLoggingLevel;
use crate::engine::Engine;

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub port: u16,
    pub metrics_port: u16,
    pub requests_logging_level: RequestsLoggingLevel,
}

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub engine: Arc<Engine>,
}

impl FromRef<ServerState> for Arc<Engine> {
    fn from_ref(input: &ServerState) -> Self {
        input.engine.clone()
    }
}
