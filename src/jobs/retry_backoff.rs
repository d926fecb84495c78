//! Exponential backoff shared by job retries and webhook redelivery

use std::time::Duration;

use crate::config::BackoffConfig;

#[derive(Clone, Debug)]
pub struct BackoffRetryPolicy {
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl BackoffRetryPolicy {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            initial_backoff: Duration::from_millis(config.initial_ms),
            multiplier: config.multiplier.max(1.0),
            max_backoff: Duration::from_millis(config.max_ms.max(config.initial_ms)),
        }
    }

    /// Delay before attempt `attempt + 1`, zero-based
    pub fn backoff_duration(&self, attempt: usize) -> Duration {
        let exp = attempt.min(i32::MAX as usize) as i32;
        let backoff = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exp);
        Duration::from_millis(backoff.min(self.max_backoff.as_millis() as f64) as u64)
    }
}
