//! End-to-end tests for the enrichment HTTP client
//!
//! Status mapping, timeouts and response validation against the fake services.

mod common;

use axum::http::StatusCode;
use chrono::Utc;
use common::FakeService;
use osint_engine::enrichment::{
    EnrichmentError, EnrichmentService, HttpEnrichmentClient, Service,
};
use osint_engine::jobs::{JobKind, JobResults};
use serde_json::json;
use std::time::Duration;

fn client_for(security: &FakeService, ai: &FakeService, timeout: Duration) -> HttpEnrichmentClient {
    HttpEnrichmentClient::new(&security.base_url, &ai.base_url, timeout)
        .expect("Failed to create client")
}

#[tokio::test]
async fn test_configure_security_decodes_metadata() {
    let security = FakeService::security().await;
    let ai = FakeService::ai().await;
    let client = client_for(&security, &ai, Duration::from_secs(5));

    let meta = client
        .configure_security("example.com", JobKind::Subdomain, 3)
        .await
        .unwrap();
    assert_eq!(meta.tls_profile, "chrome_120");
    assert_eq!(meta.detection_risk, "low");

    let request = security.last_request().unwrap();
    assert_eq!(request["job_type"], "subdomain");
    assert_eq!(request["priority"], 3);
}

#[tokio::test]
async fn test_analyze_sends_results_and_validates() {
    let security = FakeService::security().await;
    let ai = FakeService::ai().await;
    let client = client_for(&security, &ai, Duration::from_secs(5));

    let mut results = JobResults::new();
    results.insert("subdomains".into(), json!(["www.example.com"]));
    let analysis = client
        .analyze("job_1_abcdef01", JobKind::Subdomain, "example.com", &results, Utc::now())
        .await
        .unwrap();
    assert_eq!(analysis.classification, "benign");
    assert_eq!(analysis.entities.len(), 1);

    let request = ai.last_request().unwrap();
    assert_eq!(request["job_id"], "job_1_abcdef01");
    assert_eq!(request["results"]["subdomains"][0], "www.example.com");
    assert!(request["timestamp"].is_string());
}

#[tokio::test]
async fn test_server_error_is_unavailable() {
    let security = FakeService::security().await;
    let ai = FakeService::ai().await;
    security.fail_work_with(StatusCode::INTERNAL_SERVER_ERROR);
    let client = client_for(&security, &ai, Duration::from_secs(5));

    let err = client
        .configure_security("example.com", JobKind::Email, 0)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EnrichmentError::ServiceUnavailable {
            service: Service::Security,
            ..
        }
    ));
    assert_eq!(security.work_calls(), 1);
}

#[tokio::test]
async fn test_client_error_is_bad_response() {
    let security = FakeService::security().await;
    let ai = FakeService::ai().await;
    ai.fail_work_with(StatusCode::UNPROCESSABLE_ENTITY);
    let client = client_for(&security, &ai, Duration::from_secs(5));

    let err = client
        .analyze("job_1", JobKind::Email, "example.com", &JobResults::new(), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EnrichmentError::BadResponse {
            service: Service::Ai,
            ..
        }
    ));
}

#[tokio::test]
async fn test_out_of_range_confidence_is_bad_response() {
    let security = FakeService::security().await;
    let ai = FakeService::ai().await;
    ai.set_invalid_confidence(true);
    let client = client_for(&security, &ai, Duration::from_secs(5));

    let err = client
        .analyze("job_1", JobKind::General, "example.com", &JobResults::new(), Utc::now())
        .await
        .unwrap_err();
    match err {
        EnrichmentError::BadResponse { reason, .. } => assert!(reason.contains("1.7")),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_timeout_is_unavailable_without_retry() {
    let security = FakeService::security().await;
    let ai = FakeService::ai().await;
    security.set_work_delay(Duration::from_millis(500));
    let client = client_for(&security, &ai, Duration::from_millis(100));

    let err = client
        .configure_security("example.com", JobKind::Email, 0)
        .await
        .unwrap_err();
    match err {
        EnrichmentError::ServiceUnavailable { reason, .. } => {
            assert_eq!(reason, "request timed out")
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(security.work_calls(), 1);
}

#[tokio::test]
async fn test_health_checks() {
    let security = FakeService::security().await;
    let ai = FakeService::ai().await;
    let client = client_for(&security, &ai, Duration::from_secs(5));

    client.check_health(Service::Security).await.unwrap();
    client.check_health(Service::Ai).await.unwrap();

    ai.set_health_down(true);
    let err = client.check_health(Service::Ai).await.unwrap_err();
    assert_eq!(err.service(), Service::Ai);
}

#[tokio::test]
async fn test_unreachable_service_is_unavailable() {
    // Nothing listens on the discard port.
    let client = HttpEnrichmentClient::new(
        "http://127.0.0.1:9",
        "http://127.0.0.1:9",
        Duration::from_secs(2),
    )
    .unwrap();

    let err = client.check_health(Service::Security).await.unwrap_err();
    assert!(matches!(err, EnrichmentError::ServiceUnavailable { .. }));
}
