use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::EngineSettings;
use crate::enrichment::EnrichmentService;
use crate::extraction::Extractors;
use crate::proxy::ProxyManager;
use crate::queue::{EventBus, JobQueue, JobStore, RetryPolicy};

/// Shared resources handed to every worker.
///
/// Built once by the caller and passed explicitly; nothing in the engine reaches for
/// process-wide state.
pub struct EngineContext {
    pub settings: EngineSettings,

    pub queue: Arc<JobQueue>,

    pub proxies: Arc<ProxyManager>,

    /// Security configuration and AI analysis.
    pub enrichment: Arc<dyn EnrichmentService>,

    /// Handler table, one extractor per job kind.
    pub extractors: Extractors,

    /// Extract without a proxy when none is healthy, instead of failing the attempt.
    pub direct_fallback: bool,

    /// Cancelled once on shutdown. Stops workers and the proxy health loop.
    pub shutdown: CancellationToken,
}

impl EngineContext {
    pub fn new(
        settings: EngineSettings,
        store: Arc<dyn JobStore>,
        proxies: Arc<ProxyManager>,
        enrichment: Arc<dyn EnrichmentService>,
        extractors: Extractors,
    ) -> Self {
        let queue = JobQueue::new(
            store,
            RetryPolicy::new(&settings),
            settings.queue_capacity,
            EventBus::default(),
        );
        Self {
            settings,
            queue: Arc::new(queue),
            proxies,
            enrichment,
            extractors,
            direct_fallback: true,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_direct_fallback(mut self, direct_fallback: bool) -> Self {
        self.direct_fallback = direct_fallback;
        self
    }
}
