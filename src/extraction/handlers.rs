//! Baseline extractors. They validate the target and return each kind's result skeleton;
//! collectors that actually fetch pages plug in through [`Extractor`].

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ExtractionError, Extractor};
use crate::jobs::{Job, JobResults};
use crate::proxy::Proxy;

fn into_results(value: Value) -> JobResults {
    match value {
        Value::Object(map) => map,
        _ => JobResults::new(),
    }
}

fn require_target(job: &Job) -> Result<&str, ExtractionError> {
    let target = job.target.trim();
    if target.is_empty() {
        return Err(ExtractionError::Permanent("empty target".to_string()));
    }
    Ok(target)
}

/// Hostname-ish: non-empty labels of letters, digits and hyphens.
fn is_hostname(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|label| {
            !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

pub struct EmailExtractor;

#[async_trait]
impl Extractor for EmailExtractor {
    async fn extract(
        &self,
        job: &Job,
        _proxy: Option<&Proxy>,
    ) -> Result<JobResults, ExtractionError> {
        let target = require_target(job)?;
        // Either an address or a bare domain.
        let (emails, domain) = match target.rsplit_once('@') {
            Some((_, domain)) => (vec![target.to_string()], domain),
            None => (vec![], target),
        };
        if !is_hostname(domain) {
            return Err(ExtractionError::Permanent(format!(
                "'{}' is not a domain or email address",
                target
            )));
        }
        Ok(into_results(json!({
            "emails_found": emails,
            "domains": [domain.to_ascii_lowercase()],
            "confidence": 0.0,
        })))
    }
}

pub struct SubdomainExtractor;

#[async_trait]
impl Extractor for SubdomainExtractor {
    async fn extract(
        &self,
        job: &Job,
        _proxy: Option<&Proxy>,
    ) -> Result<JobResults, ExtractionError> {
        let target = require_target(job)?;
        if !is_hostname(target) {
            return Err(ExtractionError::Permanent(format!(
                "'{}' is not a domain",
                target
            )));
        }
        Ok(into_results(json!({
            "subdomains": [],
            "active_hosts": [],
            "technologies": [],
        })))
    }
}

pub struct SocialProfileExtractor;

#[async_trait]
impl Extractor for SocialProfileExtractor {
    async fn extract(
        &self,
        job: &Job,
        _proxy: Option<&Proxy>,
    ) -> Result<JobResults, ExtractionError> {
        require_target(job)?;
        Ok(into_results(json!({
            "profiles": [],
            "connections": [],
            "activity": {},
        })))
    }
}

pub struct GeneralContentExtractor;

#[async_trait]
impl Extractor for GeneralContentExtractor {
    async fn extract(
        &self,
        job: &Job,
        _proxy: Option<&Proxy>,
    ) -> Result<JobResults, ExtractionError> {
        require_target(job)?;
        Ok(into_results(json!({
            "content": "",
            "links": [],
            "metadata": {},
            "technologies": [],
        })))
    }
}
