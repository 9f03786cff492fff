//! Idempotent publication of final job state.

use std::sync::Arc;
use tracing::debug;

use super::events::{EventBus, JobEvent};
use super::store::JobStore;
use crate::jobs::{Job, JobState};

/// Stores each terminal job once, keyed by id, and announces it on the event bus.
#[derive(Clone)]
pub struct ResultSink {
    store: Arc<dyn JobStore>,
    events: EventBus,
}

impl ResultSink {
    pub fn new(store: Arc<dyn JobStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Publishes the final state of `job`. Republishing an id is a no-op returning false.
    pub fn publish(&self, job: &Job) -> anyhow::Result<bool> {
        if !self.store.store_result(job)? {
            debug!("Result for job {} already published", job.id);
            return Ok(false);
        }

        let job_id = job.id.clone();
        let error = job.last_error.clone().unwrap_or_default();
        let event = match job.state {
            JobState::Completed => JobEvent::Completed { job_id },
            JobState::DeadLettered => JobEvent::DeadLettered { job_id, error },
            _ => JobEvent::Failed { job_id, error },
        };
        self.events.publish(event);
        Ok(true)
    }

    pub fn fetch(&self, id: &str) -> anyhow::Result<Option<Job>> {
        self.store.get_result(id)
    }

    /// Publishes terminal jobs whose result never made it to the sink, e.g. after a crash
    /// between finishing a job and publishing it.
    pub fn republish_missing(&self) -> anyhow::Result<usize> {
        let mut published = 0;
        for job in self.store.unpublished_terminal()? {
            if self.publish(&job)? {
                published += 1;
            }
        }
        Ok(published)
    }
}
