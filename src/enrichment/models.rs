//! Wire types for the security and AI services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::jobs::JobResults;

/// One of the two enrichment services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Security,
    Ai,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Security => "security",
            Service::Ai => "ai",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EnrichmentError {
    /// Connection failure, timeout, or a 5xx status.
    #[error("{service} service unavailable: {reason}")]
    ServiceUnavailable { service: Service, reason: String },

    /// Non-success 4xx status, or a body that does not decode or validate.
    #[error("bad response from {service} service: {reason}")]
    BadResponse { service: Service, reason: String },
}

impl EnrichmentError {
    pub fn service(&self) -> Service {
        match self {
            EnrichmentError::ServiceUnavailable { service, .. }
            | EnrichmentError::BadResponse { service, .. } => *service,
        }
    }
}

/// `POST /security/configure`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfigRequest {
    pub target: String,
    pub job_type: String,
    pub priority: i32,
}

/// `POST /analyze`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub job_id: String,
    pub job_type: String,
    pub target: String,
    pub results: JobResults,
    pub timestamp: DateTime<Utc>,
}
