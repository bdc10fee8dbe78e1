//! Retry policy for remote calls.
//!
//! After every failed attempt the executor asks the policy whether to try
//! again. The loop ends once [`RetryDecision::Fail`] is returned, which
//! happens at the latest after `max_attempts` calls.

use crate::client::RemoteError;
use std::time::Duration;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Fail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total calls allowed, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(5000),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Delay before retry number `retry` (1-based): `initial * multiplier^(retry-1)`,
    /// capped at `max_backoff`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(64) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Decide after `attempts` calls have been made, the last failing with `err`.
    pub fn decide(&self, err: &RemoteError, attempts: u32) -> RetryDecision {
        if !err.is_retryable() || attempts >= self.max_attempts.max(1) {
            return RetryDecision::Fail;
        }
        RetryDecision::RetryAfter(self.delay_for(attempts))
    }
}
