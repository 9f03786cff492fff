//! Retry policy for failed extraction attempts.
//!
//! Implements capped exponential backoff.

use std::time::Duration;

use crate::config::EngineSettings;
use crate::extraction::ExtractionError;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts (first try included) before a job is dead-lettered.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            backoff_multiplier: settings.backoff_multiplier,
        }
    }

    /// Delay before the job may be claimed again after its `attempts`-th attempt failed.
    ///
    /// `initial_backoff * multiplier^(attempts - 1)`, capped at `max_backoff`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let backoff_ms =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped_ms = backoff_ms.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped_ms.max(0.0) as u64)
    }

    /// Whether a job that failed with `error` after `attempts` attempts gets another one.
    pub fn should_retry(&self, error: &ExtractionError, attempts: u32) -> bool {
        error.is_retryable() && attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&EngineSettings::default())
    }
}
