//! Top-level orchestration: dependency checks, worker pool lifecycle, job intake.

mod context;

pub use context::EngineContext;

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::enrichment::{EnrichmentError, Service};
use crate::error::EngineError;
use crate::jobs::{DeadLetter, Job, JobKind, JobSpec};
use crate::queue::{JobEvent, QueueStats};
use crate::worker::WorkerPool;

/// What a shutdown left behind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShutdownReport {
    /// Workers still busy at the deadline.
    pub aborted_workers: usize,
    /// Claimed jobs put back in the queue.
    pub released_jobs: usize,
}

struct Running {
    pool: WorkerPool,
    health_loop: Option<JoinHandle<()>>,
}

pub struct Engine {
    ctx: Arc<EngineContext>,
    engine_id: String,
    accepting: AtomicBool,
    running: Mutex<Option<Running>>,
}

impl Engine {
    pub fn new(ctx: EngineContext) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            ctx: Arc::new(ctx),
            engine_id: format!("engine-{}", &suffix[..8]),
            accepting: AtomicBool::new(true),
            running: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.engine_id
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Verify both enrichment services answer, recover jobs left in flight by a previous
    /// run, then start the proxy health loop and the worker pool.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("Engine {} already started", self.engine_id);
            return Ok(());
        }
        if self.ctx.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }

        self.check_dependencies().await?;

        let queue = &self.ctx.queue;
        queue.recover_orphans()?;
        let republished = queue.sink().republish_missing()?;
        if republished > 0 {
            info!("Republished {} result(s) missed by a previous run", republished);
        }
        let stats = queue.stats()?;
        info!(
            "Queue has {} active job(s) (capacity {})",
            stats.active, stats.capacity
        );

        let health_loop = if self.ctx.proxies.is_empty().await {
            info!("No proxies configured, extracting directly");
            None
        } else {
            Some(tokio::spawn(
                self.ctx
                    .proxies
                    .clone()
                    .run_health_loop(self.ctx.shutdown.clone()),
            ))
        };

        let pool = WorkerPool::spawn(
            self.ctx.clone(),
            &self.engine_id,
            self.ctx.settings.worker_pool_size,
        );
        *running = Some(Running { pool, health_loop });

        info!(
            "Engine {} started with {} worker(s)",
            self.engine_id, self.ctx.settings.worker_pool_size
        );
        Ok(())
    }

    async fn check_dependencies(&self) -> Result<(), EngineError> {
        let enrichment = &self.ctx.enrichment;
        let (security, ai) = tokio::join!(
            enrichment.check_health(Service::Security),
            enrichment.check_health(Service::Ai)
        );
        security.and(ai).map_err(|e| {
            error!("Startup dependency check failed: {}", e);
            unreachable(e)
        })
    }

    /// Validate and enqueue a job. Returns its id.
    pub fn submit(&self, spec: JobSpec) -> Result<String, EngineError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        let kind: JobKind = spec.kind.parse()?;
        self.ctx
            .queue
            .submit(kind, spec.target, spec.config, spec.priority)
    }

    pub fn status(&self, id: &str) -> Result<Job, EngineError> {
        self.ctx.queue.status(id)
    }

    pub fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, EngineError> {
        self.ctx.queue.dead_letters(limit)
    }

    pub fn stats(&self) -> Result<QueueStats, EngineError> {
        self.ctx.queue.stats()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.ctx.queue.events().subscribe()
    }

    /// Stop intake, let workers finish their current job until `timeout`, abort the
    /// rest and put whatever they still held back in the queue.
    pub async fn shutdown(&self, timeout: Duration) -> Result<ShutdownReport, EngineError> {
        self.accepting.store(false, Ordering::SeqCst);
        info!("Engine {} shutting down (timeout {:?})", self.engine_id, timeout);
        self.ctx.shutdown.cancel();

        let Some(running) = self.running.lock().await.take() else {
            return Ok(ShutdownReport::default());
        };

        let prefix = running.pool.owner_prefix().to_string();
        let aborted_workers = running.pool.join(timeout).await;
        if let Some(handle) = running.health_loop {
            if let Err(e) = handle.await {
                error!("Proxy health loop ended abnormally: {}", e);
            }
        }

        let released_jobs = self.ctx.queue.release_owned(&prefix)?;
        let report = ShutdownReport {
            aborted_workers,
            released_jobs,
        };
        info!(
            "Engine {} stopped ({} worker(s) aborted, {} job(s) released)",
            self.engine_id, report.aborted_workers, report.released_jobs
        );
        Ok(report)
    }
}

fn unreachable(err: EnrichmentError) -> EngineError {
    let service = err.service().to_string();
    let reason = match err {
        EnrichmentError::ServiceUnavailable { reason, .. }
        | EnrichmentError::BadResponse { reason, .. } => reason,
    };
    EngineError::DependencyUnreachable { service, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::extraction::Extractors;
    use crate::jobs::{AiAnalysisResult, JobResults, JobState, SecurityMetadata};
    use crate::proxy::{Proxy, ProxyManager, ProxyProber};
    use crate::queue::SqliteJobStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::AtomicBool;

    struct NoProber;

    #[async_trait]
    impl ProxyProber for NoProber {
        async fn probe(&self, _proxy: &Proxy) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeEnrichment {
        ai_down: AtomicBool,
    }

    #[async_trait]
    impl crate::enrichment::EnrichmentService for FakeEnrichment {
        async fn check_health(&self, service: Service) -> Result<(), EnrichmentError> {
            if service == Service::Ai && self.ai_down.load(Ordering::SeqCst) {
                return Err(EnrichmentError::ServiceUnavailable {
                    service,
                    reason: "connection refused".into(),
                });
            }
            Ok(())
        }

        async fn configure_security(
            &self,
            _target: &str,
            _kind: JobKind,
            _priority: i32,
        ) -> Result<SecurityMetadata, EnrichmentError> {
            Ok(SecurityMetadata::default())
        }

        async fn analyze(
            &self,
            _job_id: &str,
            _kind: JobKind,
            _target: &str,
            _results: &JobResults,
            _timestamp: DateTime<Utc>,
        ) -> Result<AiAnalysisResult, EnrichmentError> {
            Ok(AiAnalysisResult::default())
        }
    }

    fn make_engine(enrichment: FakeEnrichment, workers: usize) -> Engine {
        let settings = EngineSettings {
            worker_pool_size: workers,
            queue_capacity: 10,
            ..EngineSettings::default()
        };
        let proxies = Arc::new(ProxyManager::new(
            vec![],
            Arc::new(NoProber),
            3,
            Duration::from_secs(60),
        ));
        let ctx = EngineContext::new(
            settings,
            Arc::new(SqliteJobStore::in_memory().unwrap()),
            proxies,
            Arc::new(enrichment),
            Extractors::baseline(),
        );
        Engine::new(ctx)
    }

    async fn wait_for(engine: &Engine, id: &str, state: JobState) -> Job {
        for _ in 0..200 {
            let job = engine.status(id).unwrap();
            if job.state == state {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {}", id, state.as_str());
    }

    #[tokio::test]
    async fn test_start_fails_when_dependency_unreachable() {
        let enrichment = FakeEnrichment::default();
        enrichment.ai_down.store(true, Ordering::SeqCst);
        let engine = make_engine(enrichment, 1);

        let err = engine.start().await.unwrap_err();
        match err {
            EngineError::DependencyUnreachable { service, .. } => assert_eq!(service, "ai"),
            other => panic!("unexpected error: {}", other),
        }
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_kind() {
        let engine = make_engine(FakeEnrichment::default(), 1);
        let err = engine.submit(JobSpec::new("phone_lookup", "x")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidJobKind(k) if k == "phone_lookup"));
    }

    #[tokio::test]
    async fn test_submit_before_start_is_queued() {
        let engine = make_engine(FakeEnrichment::default(), 1);
        let id = engine.submit(JobSpec::new("email", "example.com")).unwrap();
        assert_eq!(engine.status(&id).unwrap().state, JobState::Queued);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_started_engine_completes_jobs() {
        let engine = make_engine(FakeEnrichment::default(), 2);
        engine.start().await.unwrap();

        let id = engine
            .submit(JobSpec::new("subdomain_discovery", "example.com"))
            .unwrap();
        let job = wait_for(&engine, &id, JobState::Completed).await;
        assert_eq!(job.attempts, 1);
        assert!(job.security_meta.is_some());
        assert!(job.ai_analysis.is_some());

        let report = engine.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(report, ShutdownReport::default());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let engine = make_engine(FakeEnrichment::default(), 1);
        engine.start().await.unwrap();
        engine.shutdown(Duration::from_secs(1)).await.unwrap();

        assert!(!engine.is_running().await);
        let err = engine.submit(JobSpec::new("general", "x")).unwrap_err();
        assert!(matches!(err, EngineError::ShuttingDown));
        assert!(matches!(
            engine.start().await.unwrap_err(),
            EngineError::ShuttingDown
        ));
    }
}
