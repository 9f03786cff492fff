//! Durable priority queue with retry, backoff and dead-lettering.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::{EventBus, JobEvent};
use super::result_sink::ResultSink;
use super::retry_policy::RetryPolicy;
use super::store::{CorruptJob, JobStore};
use crate::error::EngineError;
use crate::extraction::ExtractionError;
use crate::jobs::{DeadLetter, Job, JobKind, JobState};
use crate::server::metrics;

/// Upper bound on how long an idle worker sleeps before re-checking the store.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// What `retry` did with a failed job.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// Re-queued; claimable again after `delay`.
    Scheduled { attempt: u32, delay: Duration },
    DeadLettered,
    /// Non-retryable error, terminal.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub by_state: BTreeMap<&'static str, usize>,
    /// Non-terminal jobs, counted against `capacity`.
    pub active: usize,
    pub capacity: usize,
}

pub struct JobQueue {
    store: Arc<dyn JobStore>,
    retry_policy: RetryPolicy,
    capacity: usize,
    sink: ResultSink,
    events: EventBus,
    wakeup: Notify,
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        retry_policy: RetryPolicy,
        capacity: usize,
        events: EventBus,
    ) -> Self {
        let sink = ResultSink::new(store.clone(), events.clone());
        Self {
            store,
            retry_policy,
            capacity,
            sink,
            events,
            wakeup: Notify::new(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn sink(&self) -> &ResultSink {
        &self.sink
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Create, persist and enqueue a new job. Returns its id.
    pub fn submit(
        &self,
        kind: JobKind,
        target: String,
        config: HashMap<String, Value>,
        priority: i32,
    ) -> Result<String, EngineError> {
        let job = Job::new(kind, target, config, priority);
        if !self.store.insert_job(&job, self.capacity)? {
            warn!(
                "Rejected {} job for '{}': queue is full ({} active)",
                kind, job.target, self.capacity
            );
            return Err(EngineError::QueueFull {
                capacity: self.capacity,
            });
        }

        info!(
            "Queued {} job {} for '{}' (priority {})",
            kind, job.id, job.target, priority
        );
        metrics::record_job_submitted(kind.as_str());
        self.events.publish(JobEvent::Submitted {
            job_id: job.id.clone(),
        });
        self.wakeup.notify_one();
        Ok(job.id)
    }

    /// Claim the next ready job without waiting.
    pub fn try_claim(&self, owner: &str) -> Result<Option<Job>, EngineError> {
        let now_ms = Utc::now().timestamp_millis();
        let job = self
            .store
            .claim_next(owner, now_ms)
            .map_err(classify_store_error)?;
        if let Some(job) = &job {
            debug!(
                "{} claimed job {} (attempt {})",
                owner, job.id, job.attempts
            );
            self.events.publish(JobEvent::StateChanged {
                job_id: job.id.clone(),
                state: JobState::Claimed,
            });
        }
        Ok(job)
    }

    /// Wait for and claim the next ready job. Returns `None` once `shutdown` fires.
    pub async fn claim(&self, owner: &str, shutdown: &CancellationToken) -> Option<Job> {
        loop {
            if shutdown.is_cancelled() {
                return None;
            }
            let notified = self.wakeup.notified();

            match self.try_claim(owner) {
                Ok(Some(job)) => return Some(job),
                Ok(None) => {}
                Err(e) => error!("{} failed to claim a job: {}", owner, e),
            }

            let wait = self.idle_wait();
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn idle_wait(&self) -> Duration {
        match self.store.next_available_at() {
            Ok(Some(at)) => {
                let delta = at - Utc::now().timestamp_millis();
                Duration::from_millis(delta.clamp(1, IDLE_POLL.as_millis() as i64) as u64)
            }
            Ok(None) => IDLE_POLL,
            Err(e) => {
                error!("Failed to read next available job time: {}", e);
                IDLE_POLL
            }
        }
    }

    /// Move a claimed job to `next` and persist it.
    pub fn advance(&self, job: &mut Job, owner: &str, next: JobState) -> Result<(), EngineError> {
        job.transition(next)?;
        self.save(job, owner)?;
        self.events.publish(JobEvent::StateChanged {
            job_id: job.id.clone(),
            state: next,
        });
        Ok(())
    }

    /// Persist the current working copy without changing state.
    pub fn save(&self, job: &Job, owner: &str) -> Result<(), EngineError> {
        if self.store.save_claimed(job, owner)? {
            Ok(())
        } else {
            Err(EngineError::ClaimLost(job.id.clone()))
        }
    }

    /// Mark a job completed, release it and publish its result.
    pub fn complete(&self, mut job: Job, owner: &str) -> Result<Job, EngineError> {
        job.transition(JobState::Completed)?;
        job.claimed_by = None;
        self.save(&job, owner)?;

        info!("Job {} completed after {} attempt(s)", job.id, job.attempts);
        metrics::record_job_finished(job.kind.as_str(), JobState::Completed.as_str());
        self.publish(&job);
        Ok(job)
    }

    /// Account for a failed attempt: re-queue with backoff, dead-letter once the attempt
    /// budget is spent, or fail terminally when the error is not retryable.
    pub fn retry(
        &self,
        mut job: Job,
        owner: &str,
        error: &ExtractionError,
    ) -> Result<RetryOutcome, EngineError> {
        job.transition(JobState::Failed)?;
        job.last_error = Some(error.to_string());
        job.claimed_by = None;

        if self.retry_policy.should_retry(error, job.attempts) {
            let delay = self.retry_policy.backoff(job.attempts);
            job.transition(JobState::Queued)?;
            job.available_at = job.updated_at + chrono::Duration::milliseconds(delay.as_millis() as i64);
            self.save(&job, owner)?;

            warn!(
                "Job {} attempt {} failed ({}), retrying in {:?}",
                job.id, job.attempts, error, delay
            );
            metrics::record_job_retry(job.kind.as_str());
            self.events.publish(JobEvent::Retrying {
                job_id: job.id.clone(),
                attempt: job.attempts,
                delay,
            });
            self.wakeup.notify_one();
            return Ok(RetryOutcome::Scheduled {
                attempt: job.attempts,
                delay,
            });
        }

        if error.is_retryable() {
            job.transition(JobState::DeadLettered)?;
            if !self.store.dead_letter(&job, owner)? {
                return Err(EngineError::ClaimLost(job.id.clone()));
            }
            warn!(
                "Job {} dead-lettered after {} attempts: {}",
                job.id, job.attempts, error
            );
            metrics::record_job_finished(job.kind.as_str(), JobState::DeadLettered.as_str());
            self.publish(&job);
            return Ok(RetryOutcome::DeadLettered);
        }

        self.save(&job, owner)?;
        warn!("Job {} failed permanently: {}", job.id, error);
        metrics::record_job_finished(job.kind.as_str(), JobState::Failed.as_str());
        self.publish(&job);
        Ok(RetryOutcome::Failed)
    }

    fn publish(&self, job: &Job) {
        // The job row is already terminal; a missed publish is redone at next start.
        if let Err(e) = self.sink.publish(job) {
            error!("Failed to publish result for job {}: {}", job.id, e);
        }
    }

    pub fn status(&self, id: &str) -> Result<Job, EngineError> {
        self.store
            .get_job(id)
            .map_err(classify_store_error)?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    pub fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, EngineError> {
        Ok(self.store.list_dead_letters(limit)?)
    }

    pub fn stats(&self) -> Result<QueueStats, EngineError> {
        let mut by_state: BTreeMap<&'static str, usize> =
            JobState::ALL.iter().map(|s| (s.as_str(), 0)).collect();
        let mut active = 0;
        for (state, count) in self.store.count_by_state()? {
            by_state.insert(state.as_str(), count);
            if !state.is_terminal() {
                active += count;
            }
        }
        for (state, count) in &by_state {
            metrics::set_queue_depth(state, *count);
        }
        Ok(QueueStats {
            by_state,
            active,
            capacity: self.capacity,
        })
    }

    /// Return jobs left in flight by a previous process to the queue.
    pub fn recover_orphans(&self) -> Result<usize, EngineError> {
        let recovered = self.store.requeue_orphaned()?;
        if recovered > 0 {
            info!("Re-queued {} job(s) orphaned by a previous run", recovered);
            self.wakeup.notify_waiters();
        }
        Ok(recovered)
    }

    /// Return jobs claimed by owners starting with `owner_prefix` to the queue.
    pub fn release_owned(&self, owner_prefix: &str) -> Result<usize, EngineError> {
        let released = self.store.release_owned(owner_prefix)?;
        if released > 0 {
            info!("Released {} claimed job(s) back to the queue", released);
            self.wakeup.notify_waiters();
        }
        Ok(released)
    }

    /// Give a single claimed job back to the queue without counting the attempt.
    pub fn release(&self, id: &str, owner: &str) -> Result<(), EngineError> {
        if !self.store.release_claimed(id, owner)? {
            return Err(EngineError::ClaimLost(id.to_string()));
        }
        info!("Released job {} back to the queue", id);
        self.wakeup.notify_one();
        Ok(())
    }
}

fn classify_store_error(err: anyhow::Error) -> EngineError {
    match err.downcast::<CorruptJob>() {
        Ok(corrupt) => EngineError::QueueCorruption {
            id: corrupt.id,
            reason: corrupt.reason,
        },
        Err(err) => EngineError::Store(err),
    }
}
