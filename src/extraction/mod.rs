//! Kind-specific extraction.
//!
//! Page fetching and parsing live behind the [`Extractor`] trait. [`Extractors`] maps every
//! [`JobKind`] to its handler with an exhaustive match.

mod handlers;

pub use handlers::{
    EmailExtractor, GeneralContentExtractor, SocialProfileExtractor, SubdomainExtractor,
};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::jobs::{Job, JobKind, JobResults};
use crate::proxy::Proxy;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    /// Retry-eligible, e.g. network errors or a store failure mid-attempt.
    #[error("transient extraction failure: {0}")]
    Transient(String),
    /// Retrying cannot help, e.g. a malformed target.
    #[error("permanent extraction failure: {0}")]
    Permanent(String),
}

impl ExtractionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractionError::Transient(_))
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Run the extraction for `job`, through `proxy` when one was selected.
    async fn extract(&self, job: &Job, proxy: Option<&Proxy>)
        -> Result<JobResults, ExtractionError>;
}

/// Handler table, one extractor per job kind.
#[derive(Clone)]
pub struct Extractors {
    email: Arc<dyn Extractor>,
    subdomain: Arc<dyn Extractor>,
    social_media: Arc<dyn Extractor>,
    general: Arc<dyn Extractor>,
}

impl Extractors {
    /// Baseline handlers producing the result skeleton of each kind.
    pub fn baseline() -> Self {
        Self {
            email: Arc::new(EmailExtractor),
            subdomain: Arc::new(SubdomainExtractor),
            social_media: Arc::new(SocialProfileExtractor),
            general: Arc::new(GeneralContentExtractor),
        }
    }

    /// The same handler for every kind.
    pub fn uniform(extractor: Arc<dyn Extractor>) -> Self {
        Self {
            email: extractor.clone(),
            subdomain: extractor.clone(),
            social_media: extractor.clone(),
            general: extractor,
        }
    }

    pub fn with_handler(mut self, kind: JobKind, extractor: Arc<dyn Extractor>) -> Self {
        match kind {
            JobKind::Email => self.email = extractor,
            JobKind::Subdomain => self.subdomain = extractor,
            JobKind::SocialMedia => self.social_media = extractor,
            JobKind::General => self.general = extractor,
        }
        self
    }

    pub fn handler(&self, kind: JobKind) -> &Arc<dyn Extractor> {
        match kind {
            JobKind::Email => &self.email,
            JobKind::Subdomain => &self.subdomain,
            JobKind::SocialMedia => &self.social_media,
            JobKind::General => &self.general,
        }
    }

    pub async fn extract(
        &self,
        job: &Job,
        proxy: Option<&Proxy>,
    ) -> Result<JobResults, ExtractionError> {
        self.handler(job.kind).extract(job, proxy).await
    }
}

impl Default for Extractors {
    fn default() -> Self {
        Self::baseline()
    }
}
