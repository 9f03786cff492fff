//! Engine fixtures: scripted extractors, engine builder and polling helpers.

use async_trait::async_trait;
use osint_engine::config::EngineSettings;
use osint_engine::enrichment::HttpEnrichmentClient;
use osint_engine::extraction::{ExtractionError, Extractor, Extractors};
use osint_engine::jobs::{DeadLetter, Job, JobResults, JobState};
use osint_engine::proxy::{Proxy, ProxyManager, ProxyProber};
use osint_engine::{Engine, EngineContext, JobStore, SqliteJobStore};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::constants::*;
use super::fake_services::FakeService;

/// Fails with a transient error on its first `failures` calls, then succeeds.
pub struct ScriptedExtractor {
    failures: usize,
    delay: Duration,
    calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedExtractor {
    pub fn succeeding() -> Arc<Self> {
        Self::failing(0)
    }

    pub fn failing(failures: usize) -> Arc<Self> {
        Self::with_delay(failures, Duration::ZERO)
    }

    pub fn always_failing() -> Arc<Self> {
        Self::failing(usize::MAX)
    }

    pub fn with_delay(failures: usize, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            failures,
            delay,
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(vec![]),
            seen: Mutex::new(vec![]),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    /// Targets in the order they were extracted.
    pub fn seen_targets(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(
        &self,
        job: &Job,
        _proxy: Option<&Proxy>,
    ) -> Result<JobResults, ExtractionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        self.seen.lock().unwrap().push(job.target.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call < self.failures {
            return Err(ExtractionError::Transient(format!(
                "scripted failure {}",
                call + 1
            )));
        }

        let mut results = JobResults::new();
        results.insert("target".into(), json!(job.target));
        results.insert("attempt".into(), json!(call + 1));
        Ok(results)
    }
}

/// Reports every proxy as up, or every proxy as down.
struct FixedProber {
    up: bool,
}

#[async_trait]
impl ProxyProber for FixedProber {
    async fn probe(&self, proxy: &Proxy) -> anyhow::Result<()> {
        if self.up {
            Ok(())
        } else {
            anyhow::bail!("proxy {} refused the connection", proxy.url)
        }
    }
}

/// A SQLite store whose `save_claimed` fails once for each queued-up state.
pub struct FlakyStore {
    inner: SqliteJobStore,
    fail_saves: Mutex<Vec<JobState>>,
}

impl FlakyStore {
    /// Fail the next save of a job in `states[0]`, then the next in `states[1]`, and so on.
    pub fn failing_saves(states: &[JobState]) -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteJobStore::in_memory().expect("Failed to open job store"),
            fail_saves: Mutex::new(states.to_vec()),
        })
    }
}

impl JobStore for FlakyStore {
    fn insert_job(&self, job: &Job, capacity: usize) -> anyhow::Result<bool> {
        self.inner.insert_job(job, capacity)
    }

    fn get_job(&self, id: &str) -> anyhow::Result<Option<Job>> {
        self.inner.get_job(id)
    }

    fn claim_next(&self, owner: &str, now_ms: i64) -> anyhow::Result<Option<Job>> {
        self.inner.claim_next(owner, now_ms)
    }

    fn next_available_at(&self) -> anyhow::Result<Option<i64>> {
        self.inner.next_available_at()
    }

    fn save_claimed(&self, job: &Job, owner: &str) -> anyhow::Result<bool> {
        {
            let mut fail_saves = self.fail_saves.lock().unwrap();
            if fail_saves.first() == Some(&job.state) {
                fail_saves.remove(0);
                anyhow::bail!("disk I/O error");
            }
        }
        self.inner.save_claimed(job, owner)
    }

    fn dead_letter(&self, job: &Job, owner: &str) -> anyhow::Result<bool> {
        self.inner.dead_letter(job, owner)
    }

    fn release_owned(&self, owner_prefix: &str) -> anyhow::Result<usize> {
        self.inner.release_owned(owner_prefix)
    }

    fn release_claimed(&self, id: &str, owner: &str) -> anyhow::Result<bool> {
        self.inner.release_claimed(id, owner)
    }

    fn requeue_orphaned(&self) -> anyhow::Result<usize> {
        self.inner.requeue_orphaned()
    }

    fn count_by_state(&self) -> anyhow::Result<Vec<(JobState, usize)>> {
        self.inner.count_by_state()
    }

    fn list_dead_letters(&self, limit: usize) -> anyhow::Result<Vec<DeadLetter>> {
        self.inner.list_dead_letters(limit)
    }

    fn store_result(&self, job: &Job) -> anyhow::Result<bool> {
        self.inner.store_result(job)
    }

    fn get_result(&self, id: &str) -> anyhow::Result<Option<Job>> {
        self.inner.get_result(id)
    }

    fn unpublished_terminal(&self) -> anyhow::Result<Vec<Job>> {
        self.inner.unpublished_terminal()
    }
}

/// Settings with millisecond backoffs so retry tests run quickly.
pub fn test_settings(workers: usize) -> EngineSettings {
    EngineSettings {
        worker_pool_size: workers,
        max_attempts: 5,
        initial_backoff_ms: TEST_INITIAL_BACKOFF_MS,
        max_backoff_ms: TEST_MAX_BACKOFF_MS,
        backoff_multiplier: 2.0,
        queue_capacity: 100,
        enrichment_timeout_secs: 5,
        shutdown_timeout_secs: 5,
    }
}

/// An engine wired to fake enrichment services and an in-memory store.
pub struct TestEngine {
    pub engine: Arc<Engine>,
    pub security: FakeService,
    pub ai: FakeService,
}

pub struct TestEngineBuilder {
    settings: EngineSettings,
    extractor: Arc<dyn Extractor>,
    proxies: Vec<String>,
    store: Option<Arc<dyn JobStore>>,
    direct_fallback: bool,
    proxies_up: bool,
}

impl TestEngineBuilder {
    pub fn new(extractor: Arc<dyn Extractor>) -> Self {
        Self {
            settings: test_settings(2),
            extractor,
            proxies: vec![],
            store: None,
            direct_fallback: true,
            proxies_up: true,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.settings.worker_pool_size = workers;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.settings.queue_capacity = capacity;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.settings.max_attempts = max_attempts;
        self
    }

    pub fn proxies(mut self, proxies: &[&str]) -> Self {
        self.proxies = proxies.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn direct_fallback(mut self, direct_fallback: bool) -> Self {
        self.direct_fallback = direct_fallback;
        self
    }

    /// Make every health probe fail, so proxies turn unhealthy once the engine starts.
    pub fn proxies_down(mut self) -> Self {
        self.proxies_up = false;
        self
    }

    /// Use `store` instead of a fresh in-memory one.
    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build without starting.
    pub async fn build(self) -> TestEngine {
        let security = FakeService::security().await;
        let ai = FakeService::ai().await;

        let client = HttpEnrichmentClient::new(
            &security.base_url,
            &ai.base_url,
            Duration::from_secs(self.settings.enrichment_timeout_secs),
        )
        .expect("Failed to create enrichment client");

        let proxies = self
            .proxies
            .iter()
            .map(|url| Proxy::parse(url).expect("Invalid proxy url"))
            .collect();
        let proxy_manager = Arc::new(ProxyManager::new(
            proxies,
            Arc::new(FixedProber {
                up: self.proxies_up,
            }),
            3,
            Duration::from_secs(3600),
        ));

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteJobStore::in_memory().expect("Failed to open job store")),
        };
        let ctx = EngineContext::new(
            self.settings,
            store,
            proxy_manager,
            Arc::new(client),
            Extractors::uniform(self.extractor),
        )
        .with_direct_fallback(self.direct_fallback);

        TestEngine {
            engine: Arc::new(Engine::new(ctx)),
            security,
            ai,
        }
    }

    pub async fn start(self) -> TestEngine {
        let test_engine = self.build().await;
        test_engine
            .engine
            .start()
            .await
            .expect("Engine failed to start");
        test_engine
    }
}

/// Poll until job `id` reaches `state`, panicking after [`WAIT_TIMEOUT_MS`].
pub async fn wait_for_state(engine: &Engine, id: &str, state: JobState) -> Job {
    let deadline = Instant::now() + Duration::from_millis(WAIT_TIMEOUT_MS);
    loop {
        let job = engine.status(id).expect("Failed to read job status");
        if job.state == state {
            return job;
        }
        if Instant::now() > deadline {
            panic!(
                "Job {} stuck in {} (attempts {}), expected {}",
                id,
                job.state.as_str(),
                job.attempts,
                state.as_str()
            );
        }
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }
}

/// Poll until every job in `ids` is terminal.
pub async fn wait_until_terminal(engine: &Engine, ids: &[String]) -> Vec<Job> {
    let deadline = Instant::now() + Duration::from_millis(WAIT_TIMEOUT_MS);
    loop {
        let jobs: Vec<Job> = ids
            .iter()
            .map(|id| engine.status(id).expect("Failed to read job status"))
            .collect();
        if jobs.iter().all(|j| j.state.is_terminal()) {
            return jobs;
        }
        if Instant::now() > deadline {
            panic!("Jobs did not finish in time: {:?}", jobs.iter().map(|j| j.state).collect::<Vec<_>>());
        }
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }
}
