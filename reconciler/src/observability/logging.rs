//! `tracing` subscriber installation and a small timer for phase durations.

use crate::errors::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Plain,
    /// One JSON object per event.
    Json,
}

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `default_level`. Fails if a global subscriber is
/// already installed.
pub fn init_tracing(format: LogFormat, default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = match format {
        LogFormat::Plain => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| ReconcileError::Config(format!("install tracing subscriber: {e}")))
}

/// Measures how long a phase took.
#[derive(Debug)]
pub struct PhaseTimer {
    start: Instant,
    name: String,
}

impl PhaseTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns the timer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_timer() {
        let timer = PhaseTimer::start("wait");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10);
        assert_eq!(timer.name(), "wait");
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_tracing(LogFormat::Plain, "warn");
        assert!(matches!(
            init_tracing(LogFormat::Json, "warn"),
            Err(ReconcileError::Config(_))
        ));
    }

    #[test]
    fn test_log_format_from_json() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
    }
}
