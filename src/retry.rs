//! Retry policies for network and persistence operations
//!
//! One policy type covers both shapes used in the engine: fixed-delay
//! retries for binding and downloads, and exponential backoff for tracking
//! persistence.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay between every attempt.
    Fixed,
    /// The delay doubles after each failed attempt.
    Exponential,
}

/// A bounded retry loop with a delay between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            delay: initial_delay,
            backoff: Backoff::Exponential,
        }
    }

    /// Runs `operation` until it succeeds or `max_attempts` is exhausted,
    /// returning the last error. Failed attempts are logged at warn level
    /// under `label`.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut delay = self.delay;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("{label} failed (attempt {attempt}/{attempts}): {e}");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                        if self.backoff == Backoff::Exponential {
                            delay = delay.saturating_mul(2);
                        }
                    }
                }
            }
        }

        Err(last_error.expect("at least one attempt runs"))
    }
}
