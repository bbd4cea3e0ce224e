//! Backoff loop: retry until success or a hard stop.
//!
//! The single vehicle for polling external systems and retrying flaky local
//! writes. It knows nothing about tasks or pipelines.
//!
//! The closure passed to [`Backoff::run`] reports one of:
//! - `Ok(Step::Done(value))` - stop, handing `value` back to the caller;
//! - `Ok(Step::Abort(err))` - stop, handing `err` back to the caller;
//! - `Ok(Step::Pending)` - keep polling after the base interval;
//! - `Err(err)` - retry after the current interval, then grow it by the decline
//!   ratio up to the decline limit.
//!
//! Backoff only accumulates across consecutive failures: a pending step resets
//! the interval to the base.

use crate::cancellation::CancellationToken;
use crate::errors::{ReconcileError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Outcome of one backoff iteration.
#[derive(Debug)]
pub enum Step<T = ()> {
    /// Stop: the work is done.
    Done(T),
    /// Not done yet, but nothing went wrong.
    Pending,
    /// Stop with an error; no further retries.
    Abort(ReconcileError),
}

/// Retry loop with exponential backoff.
#[derive(Debug, Clone)]
pub struct Backoff {
    interval: Duration,
    decline_ratio: f64,
    decline_limit: Duration,
    max_times: u64,
    cancel: Option<Arc<CancellationToken>>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            decline_ratio: 1.0,
            decline_limit: Duration::from_secs(60),
            max_times: u64::MAX,
            cancel: None,
        }
    }
}

impl Backoff {
    /// Creates a loop with a 1s interval, no growth and no iteration limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the growth ratio. Values below 1 are treated as 1.
    #[must_use]
    pub fn with_decline_ratio(mut self, ratio: f64) -> Self {
        self.decline_ratio = if ratio.is_finite() && ratio >= 1.0 { ratio } else { 1.0 };
        self
    }

    /// Sets the cap of the interval.
    #[must_use]
    pub fn with_decline_limit(mut self, limit: Duration) -> Self {
        self.decline_limit = limit;
        self
    }

    /// Sets the maximum number of iterations.
    #[must_use]
    pub fn with_max_times(mut self, max_times: u64) -> Self {
        self.max_times = max_times;
        self
    }

    /// Stops sleeping as soon as the token is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Returns the base interval, capped at the decline limit.
    #[must_use]
    pub fn base_interval(&self) -> Duration {
        self.interval.min(self.decline_limit)
    }

    /// Interval after `looped_times` consecutive failures:
    /// `min(interval * ratio^looped_times, decline_limit)`.
    #[must_use]
    pub fn calculate_interval(&self, looped_times: u64) -> Duration {
        let exp = i32::try_from(looped_times).unwrap_or(i32::MAX);
        let nanos = self.interval.as_nanos() as f64 * self.decline_ratio.powi(exp);
        let limit = self.decline_limit.as_nanos() as f64;
        if !nanos.is_finite() || nanos >= limit {
            return self.decline_limit;
        }
        Duration::from_nanos(nanos.round() as u64)
    }

    /// Runs `f` until it stops, the iteration ceiling is hit, or the loop is cancelled.
    pub async fn run<T, F, Fut>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Step<T>>>,
    {
        let mut failures: u64 = 0;
        for attempt in 1..=self.max_times {
            let wait = match f().await {
                Ok(Step::Done(value)) => return Ok(value),
                Ok(Step::Abort(err)) => return Err(err),
                Ok(Step::Pending) => {
                    failures = 0;
                    self.base_interval()
                }
                Err(err) => {
                    let wait = self.calculate_interval(failures);
                    failures = failures.saturating_add(1);
                    debug!(attempt, wait_ms = wait.as_millis() as u64, error = %err, "backoff retry");
                    wait
                }
            };
            if attempt == self.max_times {
                break;
            }
            self.sleep(wait).await?;
        }
        Err(ReconcileError::LoopExhausted(self.max_times))
    }

    async fn sleep(&self, wait: Duration) -> Result<()> {
        match &self.cancel {
            None => {
                tokio::time::sleep(wait).await;
                Ok(())
            }
            Some(token) => {
                tokio::select! {
                    () = token.cancelled() => Err(ReconcileError::Cancelled(
                        token.reason().unwrap_or_else(|| "backoff cancelled".to_string()),
                    )),
                    () = tokio::time::sleep(wait) => Ok(()),
                }
            }
        }
    }
}
