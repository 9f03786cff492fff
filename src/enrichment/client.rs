//! HTTP client for the security and AI enrichment services.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use super::models::{AnalysisRequest, EnrichmentError, SecurityConfigRequest, Service};
use crate::jobs::{AiAnalysisResult, JobKind, JobResults, SecurityMetadata};

/// Request/response adapter to the enrichment services. One round trip per call, no retries.
#[async_trait]
pub trait EnrichmentService: Send + Sync {
    /// `GET /health` on `service`.
    async fn check_health(&self, service: Service) -> Result<(), EnrichmentError>;

    async fn configure_security(
        &self,
        target: &str,
        kind: JobKind,
        priority: i32,
    ) -> Result<SecurityMetadata, EnrichmentError>;

    async fn analyze(
        &self,
        job_id: &str,
        kind: JobKind,
        target: &str,
        results: &JobResults,
        timestamp: DateTime<Utc>,
    ) -> Result<AiAnalysisResult, EnrichmentError>;
}

pub struct HttpEnrichmentClient {
    client: reqwest::Client,
    security_url: String,
    ai_url: String,
}

impl HttpEnrichmentClient {
    /// # Arguments
    /// * `security_url` - Base URL of the security service (e.g., "http://localhost:8081")
    /// * `ai_url` - Base URL of the AI service (e.g., "http://localhost:8082")
    /// * `timeout` - Per-request timeout
    pub fn new(security_url: &str, ai_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            security_url: security_url.trim_end_matches('/').to_string(),
            ai_url: ai_url.trim_end_matches('/').to_string(),
        })
    }

    fn base_url(&self, service: Service) -> &str {
        match service {
            Service::Security => &self.security_url,
            Service::Ai => &self.ai_url,
        }
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned + Send>(
        &self,
        service: Service,
        path: &str,
        body: &B,
    ) -> Result<T, EnrichmentError> {
        let url = format!("{}{}", self.base_url(service), path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| unavailable(service, &e))?;

        let response = check_status(service, response)?;
        response
            .json::<T>()
            .await
            .map_err(|e| EnrichmentError::BadResponse {
                service,
                reason: format!("undecodable body: {}", e),
            })
    }
}

#[async_trait]
impl EnrichmentService for HttpEnrichmentClient {
    async fn check_health(&self, service: Service) -> Result<(), EnrichmentError> {
        let url = format!("{}/health", self.base_url(service));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unavailable(service, &e))?;
        check_status(service, response).map(|_| ())
    }

    async fn configure_security(
        &self,
        target: &str,
        kind: JobKind,
        priority: i32,
    ) -> Result<SecurityMetadata, EnrichmentError> {
        let request = SecurityConfigRequest {
            target: target.to_string(),
            job_type: kind.as_str().to_string(),
            priority,
        };
        self.post_json(Service::Security, "/security/configure", &request)
            .await
    }

    async fn analyze(
        &self,
        job_id: &str,
        kind: JobKind,
        target: &str,
        results: &JobResults,
        timestamp: DateTime<Utc>,
    ) -> Result<AiAnalysisResult, EnrichmentError> {
        let request = AnalysisRequest {
            job_id: job_id.to_string(),
            job_type: kind.as_str().to_string(),
            target: target.to_string(),
            results: results.clone(),
            timestamp,
        };
        let analysis: AiAnalysisResult = self.post_json(Service::Ai, "/analyze", &request).await?;
        analysis
            .validate()
            .map_err(|reason| EnrichmentError::BadResponse {
                service: Service::Ai,
                reason,
            })?;
        Ok(analysis)
    }
}

fn unavailable(service: Service, err: &reqwest::Error) -> EnrichmentError {
    let reason = if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    };
    EnrichmentError::ServiceUnavailable { service, reason }
}

fn check_status(
    service: Service,
    response: reqwest::Response,
) -> Result<reqwest::Response, EnrichmentError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status.is_server_error() {
        Err(EnrichmentError::ServiceUnavailable {
            service,
            reason: format!("status {}", status),
        })
    } else {
        Err(EnrichmentError::BadResponse {
            service,
            reason: format!("status {}", status),
        })
    }
}
