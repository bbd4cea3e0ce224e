//! Tune points and ordered chains of them.

use super::TuneContext;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// A named hook.
#[async_trait]
pub trait TunePoint: Send + Sync {
    /// Unique name within its scope.
    fn name(&self) -> &str;

    /// Runs the hook.
    async fn handle(&self, ctx: &TuneContext) -> anyhow::Result<()>;
}

/// What happened when a chain ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainOutcome {
    /// Names of hooks that succeeded, in order.
    pub succeeded: Vec<String>,
    /// Names and error messages of hooks that failed, in order.
    pub failed: Vec<(String, String)>,
}

impl ChainOutcome {
    /// Returns true if every hook succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ordered tune points for one trigger.
#[derive(Clone, Default)]
pub struct TuneChain {
    points: Vec<Arc<dyn TunePoint>>,
}

impl TuneChain {
    /// Creates an empty chain.
    #[must_use]
    pub const fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Appends a tune point.
    pub fn push(&mut self, point: Arc<dyn TunePoint>) {
        self.points.push(point);
    }

    /// Names of the points, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.points.iter().map(|p| p.name()).collect()
    }

    /// Returns the number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Runs every point in order.
    ///
    /// A failing or panicking point is logged and skipped; the rest still run.
    pub async fn handle(&self, ctx: &TuneContext) -> ChainOutcome {
        let mut outcome = ChainOutcome::default();
        for point in &self.points {
            let name = point.name().to_string();
            let result = AssertUnwindSafe(point.handle(ctx)).catch_unwind().await;
            match result {
                Ok(Ok(())) => {
                    debug!(scope = %ctx.scope, trigger = %ctx.trigger, tune_point = %name, "tune point succeeded");
                    outcome.succeeded.push(name);
                }
                Ok(Err(err)) => {
                    warn!(scope = %ctx.scope, trigger = %ctx.trigger, tune_point = %name, error = %err, "tune point failed");
                    outcome.failed.push((name, err.to_string()));
                }
                Err(_) => {
                    warn!(scope = %ctx.scope, trigger = %ctx.trigger, tune_point = %name, "tune point panicked");
                    outcome.failed.push((name, "panicked".to_string()));
                }
            }
        }
        outcome
    }
}

impl std::fmt::Debug for TuneChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
