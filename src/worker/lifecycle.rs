//! Drives one claimed job through
//! `claimed -> security_configuring -> scraping -> analyzing -> completed`.
//!
//! Only extraction failures count against the job. Security and AI enrichment are
//! best-effort: a failure is logged and the job carries on without that data.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::engine::EngineContext;
use crate::enrichment::EnrichmentError;
use crate::error::EngineError;
use crate::extraction::ExtractionError;
use crate::jobs::{AiAnalysisResult, Job, JobResults, JobState, SecurityMetadata};
use crate::proxy::Proxy;
use crate::queue::RetryOutcome;
use crate::server::metrics;

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    Retried(RetryOutcome),
    /// Returned to the queue without counting the attempt.
    Released,
}

/// Why an attempt stopped early.
enum AttemptFailure {
    /// Counts against the job's attempt budget.
    Extraction(ExtractionError),
    /// The claim was taken away; the job is no longer ours to touch.
    Abandoned(EngineError),
}

impl From<EngineError> for AttemptFailure {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ClaimLost(_) => AttemptFailure::Abandoned(err),
            other => {
                error!("Store failure during job attempt: {}", other);
                AttemptFailure::Extraction(ExtractionError::Transient(format!(
                    "store error: {}",
                    other
                )))
            }
        }
    }
}

pub struct JobProcessor {
    ctx: Arc<EngineContext>,
}

impl JobProcessor {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Run one attempt of `job`, which `owner` must have claimed, and settle it:
    /// completed, re-queued, dead-lettered or failed.
    pub async fn process(&self, mut job: Job, owner: &str) -> Result<JobOutcome, EngineError> {
        let started = Instant::now();
        let kind = job.kind;

        let outcome = match self.run_attempt(&mut job, owner).await {
            Ok(()) => match self.ctx.queue.complete(job.clone(), owner) {
                Ok(_) => Ok(JobOutcome::Completed),
                Err(err) => match AttemptFailure::from(err) {
                    AttemptFailure::Extraction(err) => self.settle_failure(job, owner, err),
                    AttemptFailure::Abandoned(err) => Err(err),
                },
            },
            Err(AttemptFailure::Extraction(err)) => self.settle_failure(job, owner, err),
            Err(AttemptFailure::Abandoned(err)) => Err(err),
        };

        metrics::record_job_duration(kind.as_str(), started.elapsed());
        outcome
    }

    /// Count a failed attempt. If even that cannot be persisted, hand the claim back so
    /// the job does not sit in flight until the next restart.
    fn settle_failure(
        &self,
        job: Job,
        owner: &str,
        err: ExtractionError,
    ) -> Result<JobOutcome, EngineError> {
        let job_id = job.id.clone();
        match self.ctx.queue.retry(job, owner, &err) {
            Ok(outcome) => Ok(JobOutcome::Retried(outcome)),
            Err(EngineError::ClaimLost(id)) => Err(EngineError::ClaimLost(id)),
            Err(retry_err) => {
                error!("Failed to record failure of job {}: {}", job_id, retry_err);
                self.ctx.queue.release(&job_id, owner)?;
                Ok(JobOutcome::Released)
            }
        }
    }

    async fn run_attempt(&self, job: &mut Job, owner: &str) -> Result<(), AttemptFailure> {
        let queue = &self.ctx.queue;

        queue.advance(job, owner, JobState::SecurityConfiguring)?;
        job.security_meta = self.configure_security(job).await;

        queue.advance(job, owner, JobState::Scraping)?;
        let results = self.scrape(job).await.map_err(AttemptFailure::Extraction)?;
        job.results = Some(results);

        queue.advance(job, owner, JobState::Analyzing)?;
        job.ai_analysis = self.analyze(job).await;
        Ok(())
    }

    async fn configure_security(&self, job: &Job) -> Option<SecurityMetadata> {
        match self
            .ctx
            .enrichment
            .configure_security(&job.target, job.kind, job.priority)
            .await
        {
            Ok(meta) => Some(meta),
            Err(e) => {
                enrichment_failed(&job.id, &e);
                None
            }
        }
    }

    async fn scrape(&self, job: &Job) -> Result<JobResults, ExtractionError> {
        let proxy = self.select_proxy(job).await?;
        let result = self.ctx.extractors.extract(job, proxy.as_ref()).await;

        if let Some(proxy) = &proxy {
            match &result {
                Ok(_) => self.ctx.proxies.report_success(&proxy.url).await,
                // A permanent error is about the target, not the proxy.
                Err(ExtractionError::Transient(_)) => {
                    self.ctx.proxies.report_failure(&proxy.url).await
                }
                Err(ExtractionError::Permanent(_)) => {}
            }
        }
        result
    }

    async fn select_proxy(&self, job: &Job) -> Result<Option<Proxy>, ExtractionError> {
        match self.ctx.proxies.select(job.kind).await {
            Ok(proxy) => Ok(Some(proxy)),
            Err(EngineError::NoHealthyProxy) if self.ctx.direct_fallback => {
                debug!("No healthy proxy for job {}, going direct", job.id);
                Ok(None)
            }
            Err(e) => Err(ExtractionError::Transient(e.to_string())),
        }
    }

    async fn analyze(&self, job: &Job) -> Option<AiAnalysisResult> {
        let empty = JobResults::new();
        let results = job.results.as_ref().unwrap_or(&empty);
        match self
            .ctx
            .enrichment
            .analyze(&job.id, job.kind, &job.target, results, Utc::now())
            .await
        {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                enrichment_failed(&job.id, &e);
                None
            }
        }
    }
}

fn enrichment_failed(job_id: &str, err: &EnrichmentError) {
    warn!("Continuing job {} without enrichment: {}", job_id, err);
    metrics::record_enrichment_failure(err.service().as_str());
}
