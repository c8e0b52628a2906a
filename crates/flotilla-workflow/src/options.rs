//! Per-activity execution options

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Timeouts, retry policy and cancellation behavior of one activity call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityOptions {
    /// Maximum time an attempt may wait in the queue before it starts
    pub schedule_to_start_timeout: Duration,
    /// Maximum execution time of a single attempt
    pub start_to_close_timeout: Duration,
    /// On cancellation, let the running attempt finish before reporting it
    pub wait_for_cancellation: bool,
    /// Retry policy of the call
    pub retry_policy: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            schedule_to_start_timeout: Duration::from_secs(10 * 60),
            start_to_close_timeout: Duration::from_secs(10 * 60),
            wait_for_cancellation: false,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl ActivityOptions {
    /// Set the schedule-to-start timeout and return self for chaining
    pub fn schedule_to_start(mut self, timeout: Duration) -> Self {
        self.schedule_to_start_timeout = timeout;
        self
    }

    /// Set the start-to-close timeout and return self for chaining
    pub fn start_to_close(mut self, timeout: Duration) -> Self {
        self.start_to_close_timeout = timeout;
        self
    }

    /// Set whether cancellation waits for the running attempt
    pub fn wait_for_cancellation(mut self, wait: bool) -> Self {
        self.wait_for_cancellation = wait;
        self
    }

    /// Set the retry policy and return self for chaining
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let options = ActivityOptions::default()
            .schedule_to_start(Duration::from_secs(1))
            .start_to_close(Duration::from_secs(2))
            .wait_for_cancellation(true)
            .retry_policy(RetryPolicy::no_retries());

        assert_eq!(options.schedule_to_start_timeout, Duration::from_secs(1));
        assert_eq!(options.start_to_close_timeout, Duration::from_secs(2));
        assert!(options.wait_for_cancellation);
        assert_eq!(options.retry_policy.maximum_attempts, 1);
    }
}
