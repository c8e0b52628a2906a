//! Retry policies with exponential backoff
//!
//! Activity attempts are retried according to a [`RetryPolicy`]. Errors
//! tagged as service (client) errors are never retried; other errors are
//! retried until the policy's maximum attempts are exhausted, unless their
//! reason is listed as non-retriable.
//!
//! # Example
//!
//! ```ignore
//! use flotilla_workflow::retry::{retry_with_policy, RetryPolicy};
//!
//! let result = retry_with_policy(
//!     &RetryPolicy::default(),
//!     "delete-node-pool",
//!     &cancel,
//!     |e: &Error| policy.should_retry(e),
//!     |attempt| async move { infra.delete_node_pool(&cluster, "pool0").await },
//! ).await?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use flotilla_common::Error;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Retry configuration for a single activity call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_interval: Duration,
    /// Multiplier applied to the delay after every failed attempt
    pub backoff_coefficient: f64,
    /// Upper bound of the delay between attempts
    pub maximum_interval: Duration,
    /// Maximum number of attempts including the first one (0 = unlimited)
    pub maximum_attempts: u32,
    /// Error reasons (see `flotilla_common::error::reason`) that are never retried
    #[serde(default)]
    pub non_retriable_error_reasons: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            backoff_coefficient: 1.5,
            maximum_interval: Duration::from_secs(30),
            maximum_attempts: 30,
            non_retriable_error_reasons: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            maximum_attempts: attempts,
            ..Default::default()
        }
    }

    /// Create a policy that makes a single attempt
    pub fn no_retries() -> Self {
        Self::with_max_attempts(1)
    }

    /// Mark an error reason as non-retriable and return self for chaining
    pub fn non_retriable(mut self, reason: impl Into<String>) -> Self {
        self.non_retriable_error_reasons.push(reason.into());
        self
    }

    /// Whether a failed attempt with this error may be retried
    pub fn should_retry(&self, error: &Error) -> bool {
        if error.is_service_error() {
            return false;
        }
        if self
            .non_retriable_error_reasons
            .iter()
            .any(|reason| reason == error.reason())
        {
            return false;
        }
        error.is_retryable()
    }

    /// Whether no further attempt is allowed after `attempt` attempts
    pub fn attempts_exhausted(&self, attempt: u32) -> bool {
        self.maximum_attempts > 0 && attempt >= self.maximum_attempts
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = delay.min(self.maximum_interval.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.maximum_interval
        }
    }
}

/// Why a retried operation gave up
#[derive(Debug, PartialEq)]
pub enum RetryError<E> {
    /// The last attempt failed and no retry is allowed
    Failed {
        /// Error of the last attempt
        error: E,
        /// Attempts made
        attempts: u32,
    },
    /// Cancellation was requested while waiting to retry
    Canceled {
        /// Attempts made
        attempts: u32,
    },
}

/// Execute an async operation, retrying failures according to `policy`
///
/// `is_retriable` decides per error whether another attempt may be made.
/// The operation receives the 1-based attempt number. Cancellation is only
/// observed between attempts; a running attempt is never abandoned here.
pub async fn retry_with_policy<F, Fut, T, E, C>(
    policy: &RetryPolicy,
    operation_name: &str,
    cancel: &CancellationToken,
    is_retriable: C,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    C: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_retriable(&e) {
                    return Err(RetryError::Failed {
                        error: e,
                        attempts: attempt,
                    });
                }

                if policy.attempts_exhausted(attempt) {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(RetryError::Failed {
                        error: e,
                        attempts: attempt,
                    });
                }

                let delay = policy.delay_after(attempt);
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Canceled { attempts: attempt });
                    }
                }
            }
        }
    }
}
