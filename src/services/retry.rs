//! Exponential backoff for contended operations.
//!
//! Only [`DomainError::is_transient`] errors are retried; everything else
//! is returned on the first failure.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::RetryConfig;

/// Retry policy backed by `backoff`'s exponential schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms.max(1)),
            max_backoff: Duration::from_millis(max_backoff_ms.max(initial_backoff_ms.max(1))),
        }
    }

    /// Execute `operation`, retrying transient failures up to `max_retries` times.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> DomainResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        let schedule = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build();
        let max_retries = self.max_retries;
        let mut attempt = 0u32;

        backoff::future::retry(schedule, || {
            attempt += 1;
            let current = attempt;
            let limit = max_retries;
            let pending = operation();
            async move {
                match pending.await {
                    Ok(value) => {
                        if current > 1 {
                            debug!(attempt = current, "Operation succeeded after retry");
                        }
                        Ok(value)
                    }
                    Err(err) if err.is_transient() && current <= limit => {
                        debug!(attempt = current, error = %err, "Transient failure, backing off");
                        Err(backoff::Error::transient(err))
                    }
                    Err(err) => {
                        if err.is_transient() {
                            warn!(attempts = current, error = %err, "Retry budget exhausted");
                        }
                        Err(backoff::Error::permanent(err))
                    }
                }
            }
        })
        .await
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            config.initial_backoff_ms,
            config.max_backoff_ms,
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}
