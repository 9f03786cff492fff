//! Fake security and AI services
//!
//! Each fake is a small axum app bound to an ephemeral port. Tests flip its switches to
//! simulate outages and malformed answers.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Default)]
pub struct FakeServiceState {
    /// When false, `/health` answers 503.
    health_down: AtomicBool,
    /// Status for the work endpoint; 0 means 200 with a valid body.
    work_status: AtomicU16,
    /// Delay before answering the work endpoint, in milliseconds.
    work_delay_ms: AtomicU64,
    /// Answer the work endpoint with a confidence outside [0, 1].
    invalid_confidence: AtomicBool,
    pub work_calls: AtomicUsize,
    pub last_request: std::sync::Mutex<Option<Value>>,
}

pub struct FakeService {
    pub base_url: String,
    pub state: Arc<FakeServiceState>,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl FakeService {
    /// Fake security service: `GET /health`, `POST /security/configure`.
    pub async fn security() -> Self {
        Self::spawn(|state| {
            Router::new()
                .route("/health", get(health))
                .route("/security/configure", post(configure))
                .with_state(state)
        })
        .await
    }

    /// Fake AI service: `GET /health`, `POST /analyze`.
    pub async fn ai() -> Self {
        Self::spawn(|state| {
            Router::new()
                .route("/health", get(health))
                .route("/analyze", post(analyze))
                .with_state(state)
        })
        .await
    }

    async fn spawn(make_router: impl FnOnce(Arc<FakeServiceState>) -> Router) -> Self {
        let state = Arc::new(FakeServiceState::default());
        let app = make_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Fake service failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn set_health_down(&self, down: bool) {
        self.state.health_down.store(down, Ordering::SeqCst);
    }

    /// Make the work endpoint answer `status`.
    pub fn fail_work_with(&self, status: StatusCode) {
        self.state.work_status.store(status.as_u16(), Ordering::SeqCst);
    }

    pub fn set_work_delay(&self, delay: Duration) {
        self.state
            .work_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_invalid_confidence(&self, invalid: bool) {
        self.state.invalid_confidence.store(invalid, Ordering::SeqCst);
    }

    pub fn work_calls(&self) -> usize {
        self.state.work_calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<Value> {
        self.state.last_request.lock().unwrap().clone()
    }
}

async fn health(State(state): State<Arc<FakeServiceState>>) -> StatusCode {
    if state.health_down.load(Ordering::SeqCst) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// Common prologue of the work endpoints. Returns an error response when one is scripted.
async fn begin_work(state: &FakeServiceState, body: Value) -> Option<Response> {
    state.work_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_request.lock().unwrap() = Some(body);

    let delay = state.work_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    match state.work_status.load(Ordering::SeqCst) {
        0 => None,
        code => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            Some((status, "scripted failure").into_response())
        }
    }
}

async fn configure(State(state): State<Arc<FakeServiceState>>, Json(body): Json<Value>) -> Response {
    if let Some(response) = begin_work(&state, body).await {
        return response;
    }
    Json(json!({
        "fingerprint": "fp-test",
        "proxy_used": "direct",
        "tls_profile": "chrome_120",
        "user_agent": "Mozilla/5.0 (test)",
        "detection_risk": "low",
    }))
    .into_response()
}

async fn analyze(State(state): State<Arc<FakeServiceState>>, Json(body): Json<Value>) -> Response {
    if let Some(response) = begin_work(&state, body).await {
        return response;
    }
    let confidence = if state.invalid_confidence.load(Ordering::SeqCst) {
        1.7
    } else {
        0.9
    };
    Json(json!({
        "threat_level": "low",
        "entities": [{ "type": "domain", "value": "example.com", "confidence": confidence }],
        "sentiment": "neutral",
        "classification": "benign",
        "iocs": [],
        "related_campaigns": [],
    }))
    .into_response()
}
