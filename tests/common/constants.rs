//! Timing constants shared by the integration tests.

pub const TEST_INITIAL_BACKOFF_MS: u64 = 20;
pub const TEST_MAX_BACKOFF_MS: u64 = 500;

/// Upper bound for any single wait on job progress.
pub const WAIT_TIMEOUT_MS: u64 = 10_000;
pub const POLL_INTERVAL_MS: u64 = 10;

pub const SERVER_READY_TIMEOUT_MS: u64 = 5_000;
