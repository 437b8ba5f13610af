//! Retry with exponential backoff for upstream calls
//!
//! Every upstream fetch goes through [`with_retry`]. The delay before retry
//! `i` (0-based) is `base_delay * multiplier^i`, capped at `max_backoff`, with
//! no jitter. Attempts are bounded by `max_retries` and, optionally, by a total
//! elapsed-time budget.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Backoff multiplier applied per attempt
    pub multiplier: f64,

    /// Maximum delay between two attempts
    pub max_backoff: Duration,

    /// Give up once this much time has passed since the first attempt
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    /// 1ms, 10ms, 100ms: three retries on a base-10 schedule
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            multiplier: 10.0,
            max_backoff: Duration::from_secs(10),
            max_elapsed: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    /// Policy for rate-limited APIs (longer initial backoff)
    pub fn for_rate_limited() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
            max_elapsed: Some(Duration::from_secs(300)),
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate backoff duration for a given attempt
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    fn out_of_time(&self, started: Instant, next_delay: Duration) -> bool {
        match self.max_elapsed {
            Some(budget) => started.elapsed() + next_delay > budget,
            None => false,
        }
    }
}

/// Retry classification for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation
    Retry,
    /// Retry after a specific duration (e.g., from Retry-After header)
    RetryAfter(Duration),
    /// Don't retry, the error is permanent
    NoRetry,
}

/// Trait for errors that can indicate whether to retry
pub trait RetryableError {
    /// Determine if this error should be retried
    fn retry_decision(&self) -> RetryDecision;
}

/// Execute an async operation with retry logic
///
/// # Arguments
/// * `policy` - Retry policy
/// * `operation_name` - Name for logging purposes
/// * `operation` - The async operation to execute
///
/// # Returns
/// The result of the operation, or the last error if all retries failed
pub async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let decision = e.retry_decision();

                let backoff = match decision {
                    RetryDecision::NoRetry => {
                        debug!(
                            operation = operation_name,
                            attempt = attempt,
                            "Operation failed with non-retryable error: {}",
                            e
                        );
                        return Err(e);
                    }
                    RetryDecision::RetryAfter(d) => d.min(policy.max_backoff),
                    RetryDecision::Retry => policy.backoff_duration(attempt),
                };

                if attempt >= policy.max_retries || policy.out_of_time(started, backoff) {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Operation failed after {} attempts: {}",
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }

                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "Retrying after error: {}",
                    e
                );
                let label = operation_name
                    .split_once(':')
                    .map(|(namespace, _)| namespace)
                    .unwrap_or(operation_name);
                crate::metrics::record_retry(label);

                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
