//! Collaborators the reconciler consumes through narrow interfaces.
//!
//! Nothing here is implemented against a real backend; callers inject their
//! own implementations through [`ReconcilerPorts`].

mod executor;
mod report;
mod resolver;
mod store;
mod throttler;

pub use executor::{Executor, ExecutorRegistry, ExecutorStatus, Existence};
pub use report::{NoOpReportService, Report, ReportKind, ReportService};
pub use resolver::{ActionResolver, Resolution, ResolvedAction};
pub use store::TaskStore;
pub use throttler::{Admission, InMemoryThrottler, Throttler};

#[cfg(test)]
pub use executor::MockExecutor;
#[cfg(test)]
pub use throttler::MockThrottler;

use crate::aop::TuneEngine;
use crate::events::{EventSink, LoggingEventSink};
use crate::expression::{ExpressionEvaluator, SimpleExpression};
use std::sync::Arc;

/// Injected capabilities shared by every task run.
#[derive(Clone)]
pub struct ReconcilerPorts {
    /// Task persistence.
    pub store: Arc<dyn TaskStore>,
    /// Admission control.
    pub throttler: Arc<dyn Throttler>,
    /// Action resolution for prepare.
    pub resolver: Arc<dyn ActionResolver>,
    /// Report sink used by the loop controller and hooks.
    pub report: Arc<dyn ReportService>,
    /// Evaluator for `if` and loop break expressions.
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    /// Task-changed events.
    pub events: Arc<dyn EventSink>,
    /// Hook engine.
    pub tune: Arc<TuneEngine>,
}

impl std::fmt::Debug for ReconcilerPorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcilerPorts")
            .field("tune", &self.tune)
            .finish_non_exhaustive()
    }
}

impl ReconcilerPorts {
    /// Creates ports with the required collaborators.
    ///
    /// Reports are dropped, events are logged, expressions use
    /// [`SimpleExpression`] and the hook engine is built with no hooks.
    #[must_use]
    pub fn new(
        store: Arc<dyn TaskStore>,
        throttler: Arc<dyn Throttler>,
        resolver: Arc<dyn ActionResolver>,
    ) -> Self {
        Self {
            store,
            throttler,
            resolver,
            report: Arc::new(NoOpReportService),
            evaluator: Arc::new(SimpleExpression::new()),
            events: Arc::new(LoggingEventSink::default()),
            tune: Arc::new(TuneEngine::empty()),
        }
    }

    /// Sets the report service.
    #[must_use]
    pub fn with_report_service(mut self, report: Arc<dyn ReportService>) -> Self {
        self.report = report;
        self
    }

    /// Sets the expression evaluator.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the hook engine.
    #[must_use]
    pub fn with_tune_engine(mut self, tune: Arc<TuneEngine>) -> Self {
        self.tune = tune;
        self
    }
}
