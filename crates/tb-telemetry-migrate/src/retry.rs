//! Retry logic with exponential backoff for ThingsBoard API calls.
//!
//! A [`RetryPolicy`] is built once per run and applied at each call site
//! (device lookup, key listing, telemetry read and write, login). Only errors
//! accepted by the policy's predicate are retried; everything else is
//! returned on the first failure.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Decides whether a failed attempt should be repeated.
pub type RetryPredicate = fn(&Error) -> bool;

/// Retry behaviour for a fallible operation.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (2.0 doubles the delay each retry).
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter to each delay.
    pub add_jitter: bool,
    /// Which errors are worth another attempt.
    pub retry_if: RetryPredicate,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("add_jitter", &self.add_jitter)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
            retry_if: is_retryable_error,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
            retry_if: is_retryable_error,
        }
    }

    /// Replaces the retryable-error predicate.
    #[must_use]
    pub fn with_predicate(mut self, retry_if: RetryPredicate) -> Self {
        self.retry_if = retry_if;
        self
    }

    /// Calculates the delay before the given retry (1 = first retry).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);

        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.add_jitter {
            let jitter = capped_delay * 0.25 * rand_jitter();
            capped_delay + jitter
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Delay before the given retry after `error` failed the previous attempt.
    ///
    /// A server-requested wait (`Retry-After`) raises the backoff delay, but
    /// never beyond `max_delay`.
    pub fn delay_after_error(&self, attempt: u32, error: &Error) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        match error.retry_after() {
            Some(requested) => delay.max(requested.min(self.max_delay)),
            None => delay,
        }
    }

    /// Runs `operation` under this policy. See [`with_retry`].
    pub async fn run<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        with_retry(self, operation_name, operation).await
    }
}

/// Pseudo-random jitter in [0.0, 1.0) taken from the clock's sub-second nanos.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Default predicate: retry transient transport and server errors only.
pub fn is_retryable_error(error: &Error) -> bool {
    error.is_transient()
}

/// Executes an async operation with retry logic.
///
/// Returns the first successful result. A non-retryable error is returned
/// unchanged. When every attempt failed with a retryable error the last one
/// is wrapped in [`Error::RetryExhausted`].
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    let mut delay = Duration::ZERO;

    loop {
        if attempt > 0 {
            debug!(
                "{}: Retry attempt {}/{} after {:?}",
                operation_name,
                attempt,
                max_attempts - 1,
                delay
            );
            sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{}: Succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if !(policy.retry_if)(&e) => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(Error::RetryExhausted {
                        operation: operation_name.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                warn!(
                    "{}: Retryable error (attempt {}/{}): {}",
                    operation_name, attempt, max_attempts, e
                );
                delay = policy.delay_after_error(attempt, &e);
            }
        }
    }
}
