//! Durable job queue.
//!
//! This module provides:
//! - SQLite persistence for jobs, dead letters and published results
//! - Priority ordered, exactly-once claiming
//! - Exponential backoff retries and dead-lettering
//! - The result sink and job event bus

mod events;
mod job_queue;
mod result_sink;
mod retry_policy;
mod schema;
mod store;

pub use events::{EventBus, JobEvent};
pub use job_queue::{JobQueue, QueueStats, RetryOutcome};
pub use result_sink::ResultSink;
pub use retry_policy::RetryPolicy;
pub use store::{CorruptJob, JobStore, SqliteJobStore};
