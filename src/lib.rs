//! OSINT Engine Library
//!
//! Durable job queue, proxy rotation, worker pool and enrichment client behind the
//! `osint-engine` binary. Exposed as a library for integration tests and embedding.

pub mod config;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod extraction;
pub mod jobs;
pub mod proxy;
pub mod queue;
pub mod server;
pub mod sqlite_persistence;
pub mod worker;

// Re-export commonly used types for convenience
pub use engine::{Engine, EngineContext, ShutdownReport};
pub use error::EngineError;
pub use jobs::{Job, JobKind, JobSpec, JobState};
pub use queue::{JobStore, SqliteJobStore};
pub use server::{run_server, RequestsLoggingLevel};
