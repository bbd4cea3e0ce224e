//! Executor port and the registry that selects one per task.

use crate::core::{ExecutorKind, PipelineStatus, PipelineTask};
use crate::errors::{ReconcileError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Status reported by an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorStatus {
    /// Observed status.
    pub status: PipelineStatus,
    /// Human-readable detail, e.g. a scheduling message.
    pub desc: String,
}

impl ExecutorStatus {
    /// Creates a status without detail.
    #[must_use]
    pub fn new(status: PipelineStatus) -> Self {
        Self {
            status,
            desc: String::new(),
        }
    }

    /// Sets the detail.
    #[must_use]
    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }
}

/// Whether a job already exists on the executor side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Existence {
    /// The job was created.
    pub created: bool,
    /// The job was started.
    pub started: bool,
}

/// Backend that actually runs tasks.
///
/// Every call is treated as slow and unreliable. Dropping a returned future
/// abandons the request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Executor: Send + Sync {
    /// Backend kind served by this executor.
    fn kind(&self) -> ExecutorKind;

    /// Reports whether the task's job already exists.
    async fn exist(&self, task: &PipelineTask) -> Result<Existence>;

    /// Materializes the task's job.
    async fn create(&self, task: &PipelineTask) -> Result<()>;

    /// Starts the task's job.
    async fn start(&self, task: &PipelineTask) -> Result<()>;

    /// Returns the job's current status.
    async fn status(&self, task: &PipelineTask) -> Result<ExecutorStatus>;

    /// Returns diagnostics for a failed job.
    async fn inspect(&self, task: &PipelineTask) -> Result<String>;

    /// Stops the job.
    async fn cancel(&self, task: &PipelineTask) -> Result<()>;
}

/// Executors by kind.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: DashMap<ExecutorKind, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor under its own kind, replacing any previous one.
    pub fn register(&self, executor: Arc<dyn Executor>) {
        self.executors.insert(executor.kind(), executor);
    }

    /// Registers an executor and returns the registry.
    #[must_use]
    pub fn with_executor(self, executor: Arc<dyn Executor>) -> Self {
        self.register(executor);
        self
    }

    /// Looks up the executor for a kind.
    pub fn get(&self, kind: ExecutorKind) -> Result<Arc<dyn Executor>> {
        self.executors
            .get(&kind)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| ReconcileError::ExecutorNotFound(kind.to_string()))
    }

    /// Returns the number of registered executors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Returns true if no executor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<String> = self.executors.iter().map(|e| e.key().to_string()).collect();
        f.debug_struct("ExecutorRegistry").field("kinds", &kinds).finish()
    }
}
