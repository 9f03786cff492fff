//! Engine-level error taxonomy.

use thiserror::Error;

use crate::enrichment::EnrichmentError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Submission rejected because the queue holds `capacity` active jobs.
    #[error("job queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("invalid job kind '{0}'")]
    InvalidJobKind(String),

    #[error("no healthy proxy available")]
    NoHealthyProxy,

    #[error("{service} service unavailable: {reason}")]
    ServiceUnavailable { service: String, reason: String },

    #[error("bad response from {service} service: {reason}")]
    BadResponse { service: String, reason: String },

    /// Startup connectivity check failed. Fatal.
    #[error("dependency '{service}' unreachable: {reason}")]
    DependencyUnreachable { service: String, reason: String },

    #[error("job {id} could not be decoded: {reason}")]
    QueueCorruption { id: String, reason: String },

    #[error("job {0} not found")]
    NotFound(String),

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },

    /// The claim on a job was lost, e.g. released by a forced shutdown.
    #[error("claim on job {0} is no longer held")]
    ClaimLost(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<EnrichmentError> for EngineError {
    fn from(err: EnrichmentError) -> Self {
        match err {
            EnrichmentError::ServiceUnavailable { service, reason } => {
                EngineError::ServiceUnavailable {
                    service: service.to_string(),
                    reason,
                }
            }
            EnrichmentError::BadResponse { service, reason } => EngineError::BadResponse {
                service: service.to_string(),
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::Service;

    #[test]
    fn test_enrichment_errors_keep_their_class() {
        let err: EngineError = EnrichmentError::ServiceUnavailable {
            service: Service::Security,
            reason: "connection refused".to_string(),
        }
        .into();
        assert!(matches!(err, EngineError::ServiceUnavailable { ref service, .. } if service == "security"));

        let err: EngineError = EnrichmentError::BadResponse {
            service: Service::Ai,
            reason: "missing field".to_string(),
        }
        .into();
        assert!(matches!(err, EngineError::BadResponse { ref service, .. } if service == "ai"));
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            EngineError::QueueFull { capacity: 10 }.to_string(),
            "job queue is full (capacity 10)"
        );
        assert_eq!(
            EngineError::InvalidJobKind("phone".to_string()).to_string(),
            "invalid job kind 'phone'"
        );
        assert_eq!(
            EngineError::NotFound("job_1_abc".to_string()).to_string(),
            "job job_1_abc not found"
        );
    }
}
