//! Scopes, triggers and the per-invocation hook context.

use crate::core::{Pipeline, PipelineTask};
use crate::ports::ReportService;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Lifecycle a hook belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TuneScope {
    /// Pipeline-level lifecycle.
    Pipeline,
    /// Task-level lifecycle.
    Task,
}

impl fmt::Display for TuneScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipeline => write!(f, "pipeline"),
            Self::Task => write!(f, "task"),
        }
    }
}

/// Point in a lifecycle where hooks fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TuneTrigger {
    /// Before a pipeline or task starts executing.
    BeforeExec,
    /// After a pipeline or task finished.
    AfterExec,
    /// Before the prepare phase.
    BeforePrepare,
    /// After the prepare phase succeeded.
    AfterPrepare,
    /// Before the create phase.
    BeforeCreate,
    /// After the create phase succeeded.
    AfterCreate,
    /// Before the start phase.
    BeforeStart,
    /// After the start phase succeeded.
    AfterStart,
    /// Before the queue phase.
    BeforeQueue,
    /// After the queue phase succeeded.
    AfterQueue,
    /// Before the wait phase.
    BeforeWait,
    /// After the wait phase succeeded.
    AfterWait,
}

impl TuneTrigger {
    /// Returns the configuration name of the trigger.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeExec => "before-exec",
            Self::AfterExec => "after-exec",
            Self::BeforePrepare => "before-prepare",
            Self::AfterPrepare => "after-prepare",
            Self::BeforeCreate => "before-create",
            Self::AfterCreate => "after-create",
            Self::BeforeStart => "before-start",
            Self::AfterStart => "after-start",
            Self::BeforeQueue => "before-queue",
            Self::AfterQueue => "after-queue",
            Self::BeforeWait => "before-wait",
            Self::AfterWait => "after-wait",
        }
    }
}

impl fmt::Display for TuneTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request-scoped data handed to every hook of one invocation.
#[derive(Clone)]
pub struct TuneContext {
    /// Lifecycle scope.
    pub scope: TuneScope,
    /// Trigger that fired.
    pub trigger: TuneTrigger,
    /// Pipeline being reconciled.
    pub pipeline: Arc<Pipeline>,
    /// Task being reconciled; set for the task scope.
    pub task: Option<PipelineTask>,
    /// Report service for hooks that write reports.
    pub report: Option<Arc<dyn ReportService>>,
    /// Free-form extension slots.
    pub extensions: HashMap<String, serde_json::Value>,
}

impl TuneContext {
    /// Creates a pipeline-scoped context.
    #[must_use]
    pub fn pipeline(trigger: TuneTrigger, pipeline: Arc<Pipeline>) -> Self {
        Self {
            scope: TuneScope::Pipeline,
            trigger,
            pipeline,
            task: None,
            report: None,
            extensions: HashMap::new(),
        }
    }

    /// Creates a task-scoped context.
    #[must_use]
    pub fn task(trigger: TuneTrigger, pipeline: Arc<Pipeline>, task: PipelineTask) -> Self {
        Self {
            scope: TuneScope::Task,
            trigger,
            pipeline,
            task: Some(task),
            report: None,
            extensions: HashMap::new(),
        }
    }

    /// Sets the report service.
    #[must_use]
    pub fn with_report_service(mut self, report: Arc<dyn ReportService>) -> Self {
        self.report = Some(report);
        self
    }

    /// Sets an extension value.
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Reads an extension value.
    #[must_use]
    pub fn extension(&self, key: &str) -> Option<&serde_json::Value> {
        self.extensions.get(key)
    }
}

impl fmt::Debug for TuneContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TuneContext")
            .field("scope", &self.scope)
            .field("trigger", &self.trigger)
            .field("pipeline_id", &self.pipeline.id)
            .field("task_id", &self.task.as_ref().map(|t| t.id))
            .field("has_report", &self.report.is_some())
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .finish()
    }
}
