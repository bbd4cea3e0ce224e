//! Reconciler configuration.

use crate::aop::TuneConfig;
use crate::backoff::Backoff;
use crate::errors::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Runtime limit applied to tasks without their own timeout, in seconds.
    #[serde(default = "default_task_timeout")]
    pub default_task_timeout_secs: u64,
    /// Base interval between attempts of a failed phase, in seconds.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    /// Growth ratio of the retry interval.
    #[serde(default = "default_retry_decline_ratio")]
    pub retry_decline_ratio: f64,
    /// Cap of the retry interval, in seconds.
    #[serde(default = "default_retry_decline_limit")]
    pub retry_decline_limit_secs: u64,
    /// Lower bound of the retry interval after a platform error, in seconds.
    #[serde(default = "default_abnormal_retry_floor")]
    pub abnormal_retry_floor_secs: u64,
    /// Interval between throttler admission checks, in milliseconds.
    #[serde(default = "default_poll_ms")]
    pub admission_poll_ms: u64,
    /// Interval between executor status polls while queued, in milliseconds.
    #[serde(default = "default_poll_ms")]
    pub queue_poll_ms: u64,
    /// Interval between executor status polls while running, in milliseconds.
    #[serde(default = "default_poll_ms")]
    pub wait_poll_ms: u64,
    /// Interval between pipeline status reads, in milliseconds.
    #[serde(default = "default_store_retry_ms")]
    pub pipeline_status_poll_ms: u64,
    /// Base interval between retried store writes, in milliseconds.
    #[serde(default = "default_store_retry_ms")]
    pub update_retry_ms: u64,
    /// Cap of the store write retry interval, in milliseconds.
    #[serde(default = "default_update_retry_limit_ms")]
    pub update_retry_limit_ms: u64,
    /// How many executor lookup errors are appended to a task before they are only logged.
    #[serde(default = "default_err_append_limit")]
    pub err_append_limit: usize,
    /// A single error repeated this many times fails the task.
    #[serde(default = "default_error_exceed_count")]
    pub error_exceed_count: u64,
    /// A single error repeated over this many seconds fails the task.
    #[serde(default = "default_error_exceed_secs")]
    pub error_exceed_secs: u64,
    /// Hook names per scope and trigger.
    #[serde(default)]
    pub tune: TuneConfig,
}

fn default_task_timeout() -> u64 {
    24 * 60 * 60
}

fn default_retry_interval() -> u64 {
    5
}

fn default_retry_decline_ratio() -> f64 {
    2.0
}

fn default_retry_decline_limit() -> u64 {
    600
}

fn default_abnormal_retry_floor() -> u64 {
    30
}

fn default_poll_ms() -> u64 {
    5_000
}

fn default_store_retry_ms() -> u64 {
    1_000
}

fn default_update_retry_limit_ms() -> u64 {
    60_000
}

fn default_err_append_limit() -> usize {
    20
}

fn default_error_exceed_count() -> u64 {
    180
}

fn default_error_exceed_secs() -> u64 {
    24 * 60 * 60
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            default_task_timeout_secs: default_task_timeout(),
            retry_interval_secs: default_retry_interval(),
            retry_decline_ratio: default_retry_decline_ratio(),
            retry_decline_limit_secs: default_retry_decline_limit(),
            abnormal_retry_floor_secs: default_abnormal_retry_floor(),
            admission_poll_ms: default_poll_ms(),
            queue_poll_ms: default_poll_ms(),
            wait_poll_ms: default_poll_ms(),
            pipeline_status_poll_ms: default_store_retry_ms(),
            update_retry_ms: default_store_retry_ms(),
            update_retry_limit_ms: default_update_retry_limit_ms(),
            err_append_limit: default_err_append_limit(),
            error_exceed_count: default_error_exceed_count(),
            error_exceed_secs: default_error_exceed_secs(),
            tune: TuneConfig::default(),
        }
    }
}

impl ReconcilerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ReconcileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values for consistency.
    pub fn validate(&self) -> Result<()> {
        if !self.retry_decline_ratio.is_finite() || self.retry_decline_ratio < 1.0 {
            return Err(ReconcileError::Config(format!(
                "retry_decline_ratio must be >= 1, got {}",
                self.retry_decline_ratio
            )));
        }
        if self.retry_decline_limit_secs < self.retry_interval_secs {
            return Err(ReconcileError::Config(
                "retry_decline_limit_secs must not be below retry_interval_secs".to_string(),
            ));
        }
        if self.err_append_limit == 0 {
            return Err(ReconcileError::Config("err_append_limit must be positive".to_string()));
        }
        if self.default_task_timeout_secs == 0 {
            return Err(ReconcileError::Config(
                "default_task_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the default task timeout.
    #[must_use]
    pub fn with_default_task_timeout(mut self, timeout: Duration) -> Self {
        self.default_task_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Sets every executor and throttler polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        let ms = duration_ms(interval);
        self.admission_poll_ms = ms;
        self.queue_poll_ms = ms;
        self.wait_poll_ms = ms;
        self
    }

    /// Sets the store read and write retry interval.
    #[must_use]
    pub fn with_store_retry(mut self, interval: Duration) -> Self {
        let ms = duration_ms(interval);
        self.pipeline_status_poll_ms = ms;
        self.update_retry_ms = ms;
        self
    }

    /// Sets the phase retry interval and its floor.
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration, floor: Duration) -> Self {
        self.retry_interval_secs = interval.as_secs();
        self.abnormal_retry_floor_secs = floor.as_secs();
        self
    }

    /// Sets the hook table.
    #[must_use]
    pub fn with_tune(mut self, tune: TuneConfig) -> Self {
        self.tune = tune;
        self
    }

    /// Gets the default task timeout.
    #[must_use]
    pub fn default_task_timeout(&self) -> Duration {
        Duration::from_secs(self.default_task_timeout_secs)
    }

    /// Gets the error exceed span.
    #[must_use]
    pub fn error_exceed_span(&self) -> Duration {
        Duration::from_secs(self.error_exceed_secs)
    }

    /// Backoff for phase retries when the task declares no loop strategy.
    #[must_use]
    pub fn retry_backoff(&self) -> Backoff {
        Backoff::new()
            .with_interval(Duration::from_secs(self.retry_interval_secs))
            .with_decline_ratio(self.retry_decline_ratio)
            .with_decline_limit(Duration::from_secs(self.retry_decline_limit_secs))
    }

    /// Backoff for throttler admission polling.
    #[must_use]
    pub fn admission_backoff(&self) -> Backoff {
        fixed(self.admission_poll_ms)
    }

    /// Backoff for executor polling while queued.
    #[must_use]
    pub fn queue_backoff(&self) -> Backoff {
        fixed(self.queue_poll_ms)
    }

    /// Backoff for executor polling while running.
    #[must_use]
    pub fn wait_backoff(&self) -> Backoff {
        fixed(self.wait_poll_ms)
    }

    /// Backoff for pipeline status reads.
    #[must_use]
    pub fn pipeline_status_backoff(&self) -> Backoff {
        fixed(self.pipeline_status_poll_ms)
    }

    /// Backoff for store writes; unbounded.
    #[must_use]
    pub fn update_backoff(&self) -> Backoff {
        Backoff::new()
            .with_interval(Duration::from_millis(self.update_retry_ms))
            .with_decline_ratio(2.0)
            .with_decline_limit(Duration::from_millis(
                self.update_retry_limit_ms.max(self.update_retry_ms),
            ))
    }
}

fn fixed(ms: u64) -> Backoff {
    let interval = Duration::from_millis(ms);
    Backoff::new()
        .with_interval(interval)
        .with_decline_limit(interval)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aop::{TuneScope, TuneTrigger};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ReconcilerConfig::new();
        assert_eq!(config.default_task_timeout(), Duration::from_secs(86_400));
        assert_eq!(config.err_append_limit, 20);
        assert_eq!(
            config.tune.hooks(TuneScope::Task, TuneTrigger::AfterExec),
            ["task-report".to_string()]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_missing_fields() {
        let config = ReconcilerConfig::from_json_str(
            r#"{"wait_poll_ms": 250, "tune": {"task": {"before-wait": ["audit"]}}}"#,
        )
        .unwrap();
        assert_eq!(config.wait_poll_ms, 250);
        assert_eq!(config.queue_poll_ms, 5_000);
        assert!(config.tune.hooks(TuneScope::Task, TuneTrigger::AfterExec).is_empty());
        assert_eq!(config.wait_backoff().base_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ReconcilerConfig::from_json_str(r#"{"retry_decline_ratio": 0.5}"#).unwrap_err();
        assert!(matches!(err, ReconcileError::Config(_)));

        let err = ReconcilerConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ReconcileError::Config(_)));
    }

    #[test]
    fn test_retry_backoff_caps() {
        let backoff = ReconcilerConfig::new().retry_backoff();
        assert_eq!(backoff.calculate_interval(0), Duration::from_secs(5));
        assert_eq!(backoff.calculate_interval(1), Duration::from_secs(10));
        assert_eq!(backoff.calculate_interval(20), Duration::from_secs(600));
    }
}
