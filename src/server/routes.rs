//! Job intake and inspection routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

use super::state::ServerState;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::jobs::JobSpec;

#[derive(Debug, Deserialize)]
pub struct DeadLettersQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Response for POST /v1/jobs
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: &'static str,
}

/// Map an engine error to a status code and a JSON body.
fn error_response(err: EngineError) -> Response {
    let status = match &err {
        EngineError::InvalidJobKind(_) => StatusCode::BAD_REQUEST,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::QueueFull { .. } | EngineError::ShuttingDown => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {}", err);
    } else {
        debug!("Request rejected: {}", err);
    }
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

/// GET /health
async fn health(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "engine_id": engine.id(),
        "timestamp": Utc::now(),
    }))
}

/// POST /v1/jobs
async fn submit_job(State(engine): State<Arc<Engine>>, Json(spec): Json<JobSpec>) -> Response {
    match engine.submit(spec) {
        Ok(job_id) => (
            StatusCode::CREATED,
            Json(SubmitResponse {
                job_id,
                status: "queued",
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /v1/jobs/{id}
async fn get_job(State(engine): State<Arc<Engine>>, Path(id): Path<String>) -> Response {
    match engine.status(&id) {
        Ok(job) => Json(job).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /v1/jobs/dead-letters
async fn get_dead_letters(
    State(engine): State<Arc<Engine>>,
    Query(query): Query<DeadLettersQuery>,
) -> Response {
    match engine.dead_letters(query.limit) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /v1/queue/stats
async fn get_queue_stats(State(engine): State<Arc<Engine>>) -> Response {
    match engine.stats() {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(e),
    }
}

pub fn make_job_routes() -> Router<ServerState> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/jobs", post(submit_job))
        .route("/v1/jobs/dead-letters", get(get_dead_letters))
        .route("/v1/jobs/{id}", get(get_job))
        .route("/v1/queue/stats", get(get_queue_stats))
}
