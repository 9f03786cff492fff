//! Fixed-size pool of worker tasks claiming from the shared queue.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::lifecycle::{JobOutcome, JobProcessor};
use crate::engine::EngineContext;
use crate::error::EngineError;

pub struct WorkerPool {
    handles: Vec<(String, JoinHandle<()>)>,
    owner_prefix: String,
}

impl WorkerPool {
    /// Spawn `size` workers. Worker `n` claims jobs as `{engine_id}/w{n}`.
    pub fn spawn(ctx: Arc<EngineContext>, engine_id: &str, size: usize) -> Self {
        let handles = (0..size)
            .map(|n| {
                let owner = format!("{}/w{}", engine_id, n);
                let handle = tokio::spawn(run_worker(ctx.clone(), owner.clone()));
                (owner, handle)
            })
            .collect();

        info!("Started {} worker(s) for {}", size, engine_id);
        Self {
            handles,
            owner_prefix: format!("{}/", engine_id),
        }
    }

    /// Prefix shared by the claim owners of every worker in this pool.
    pub fn owner_prefix(&self) -> &str {
        &self.owner_prefix
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait until `timeout` for workers to finish their current job, then abort the rest.
    /// The shutdown token must already be cancelled. Returns the number of aborted workers.
    pub async fn join(self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut aborted = 0;

        for (owner, mut handle) in self.handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!("Worker {} stopped", owner),
                Ok(Err(e)) => error!("Worker {} panicked: {}", owner, e),
                Err(_) => {
                    warn!("Worker {} did not stop in time, aborting", owner);
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }
}

async fn run_worker(ctx: Arc<EngineContext>, owner: String) {
    debug!("Worker {} started", owner);
    let processor = JobProcessor::new(ctx.clone());

    while let Some(job) = ctx.queue.claim(&owner, &ctx.shutdown).await {
        let job_id = job.id.clone();
        match processor.process(job, &owner).await {
            Ok(JobOutcome::Completed) => {}
            Ok(JobOutcome::Released) => warn!("Worker {} gave job {} back", owner, job_id),
            Ok(JobOutcome::Retried(outcome)) => {
                debug!("Job {} settled as {:?}", job_id, outcome)
            }
            Err(EngineError::ClaimLost(_)) => {
                warn!("Worker {} lost its claim on job {}", owner, job_id)
            }
            Err(e) => error!("Worker {} failed to settle job {}: {}", owner, job_id, e),
        }
    }

    debug!("Worker {} exiting", owner);
}
