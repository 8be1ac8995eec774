//! Retry policy with exponential backoff
//!
//! Used for orchestrator registration, broker reconnection and result
//! publication. Delays come from `backoff::ExponentialBackoff`; the policy
//! adds a cap on the number of attempts.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Exponential backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay_ms: u64,
    /// Growth factor applied per attempt
    pub multiplier: f64,
    /// Upper bound for the un-randomized delay
    pub max_delay_ms: u64,
    /// Fraction in `[0, 1]` by which each delay is randomized
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: 0.2,
        }
    }
}

/// Exponential backoff that stops after a fixed number of retries
#[derive(Debug, Clone)]
pub struct LimitedBackoff {
    inner: ExponentialBackoff,
    retries: u32,
    remaining: u32,
}

impl Backoff for LimitedBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.inner.next_backoff()
    }

    fn reset(&mut self) {
        self.inner.reset();
        self.remaining = self.retries;
    }
}

impl RetryPolicy {
    /// Unbounded backoff for loops that keep waiting until shutdown
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.base_delay_ms))
            .with_multiplier(self.multiplier.max(1.0))
            .with_randomization_factor(self.jitter.clamp(0.0, 1.0))
            .with_max_interval(Duration::from_millis(self.max_delay_ms))
            .with_max_elapsed_time(None)
            .build()
    }

    /// Backoff that gives up once `max_attempts` attempts were made
    pub fn limited(&self) -> LimitedBackoff {
        let retries = self.max_attempts.saturating_sub(1);
        LimitedBackoff {
            inner: self.backoff(),
            retries,
            remaining: retries,
        }
    }

    /// Runs `op` until it succeeds or the attempts are exhausted
    ///
    /// `should_retry` decides whether a given error is worth another attempt.
    /// The last error is returned when retrying stops.
    pub async fn retry<T, E, F, Fut, P>(&self, op_name: &str, should_retry: P, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let attempt = AtomicU32::new(0);
        let should_retry = &should_retry;

        backoff::future::retry_notify(
            self.limited(),
            || {
                let pending = op(attempt.fetch_add(1, Ordering::Relaxed) + 1);
                async move {
                    pending.await.map_err(|e| {
                        if should_retry(&e) {
                            backoff::Error::transient(e)
                        } else {
                            backoff::Error::permanent(e)
                        }
                    })
                }
            },
            |e: E, delay: Duration| {
                warn!(
                    operation = op_name,
                    attempt = attempt.load(Ordering::Relaxed),
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed: {}",
                    e
                );
            },
        )
        .await
    }
}
