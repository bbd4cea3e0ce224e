//! In-memory task store.

use crate::core::{Pipeline, PipelineStatus, PipelineTask, TaskContext, TaskExtra, TaskResult};
use crate::errors::{ReconcileError, Result};
use crate::ports::TaskStore;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A [`TaskStore`] backed by maps.
///
/// Counts full task writes and can be told to fail the next few of them.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<u64, PipelineTask>,
    pipelines: DashMap<u64, PipelineStatus>,
    update_count: AtomicUsize,
    failing_updates: AtomicUsize,
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a pipeline's status.
    pub fn insert_pipeline(&self, pipeline: &Pipeline) {
        self.pipelines.insert(pipeline.id, pipeline.status);
    }

    /// Changes a pipeline's status.
    pub fn set_pipeline_status(&self, pipeline_id: u64, status: PipelineStatus) {
        self.pipelines.insert(pipeline_id, status);
    }

    /// Stores a task without counting it as a write.
    pub fn insert_task(&self, task: PipelineTask) {
        self.tasks.insert(task.id, task);
    }

    /// Returns the stored task.
    #[must_use]
    pub fn task(&self, id: u64) -> Option<PipelineTask> {
        self.tasks.get(&id).map(|t| t.value().clone())
    }

    /// Number of successful `update_task` calls.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.update_count.load(Ordering::SeqCst)
    }

    /// Makes the next `n` `update_task` calls fail with a platform error.
    pub fn fail_next_updates(&self, n: usize) {
        self.failing_updates.store(n, Ordering::SeqCst);
    }

    fn with_task<T>(&self, id: u64, f: impl FnOnce(&mut PipelineTask) -> T) -> Result<T> {
        let mut task = self
            .tasks
            .get_mut(&id)
            .ok_or(ReconcileError::NotFound { entity: "task", id })?;
        Ok(f(task.value_mut()))
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get_task(&self, id: u64) -> Result<PipelineTask> {
        self.task(id).ok_or(ReconcileError::NotFound { entity: "task", id })
    }

    async fn update_task(&self, task: &PipelineTask) -> Result<()> {
        let failing = self
            .failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(ReconcileError::platform("store unavailable"));
        }
        self.tasks.insert(task.id, task.clone());
        self.update_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_tasks(&self, pipeline_id: u64) -> Result<Vec<PipelineTask>> {
        let mut tasks: Vec<PipelineTask> = self
            .tasks
            .iter()
            .filter(|t| t.pipeline_id == pipeline_id)
            .map(|t| t.value().clone())
            .collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn get_pipeline_status(&self, pipeline_id: u64) -> Result<PipelineStatus> {
        self.pipelines
            .get(&pipeline_id)
            .map(|s| *s.value())
            .ok_or(ReconcileError::NotFound {
                entity: "pipeline",
                id: pipeline_id,
            })
    }

    async fn update_task_result(&self, id: u64, result: &TaskResult) -> Result<()> {
        self.with_task(id, |t| t.result = result.clone())
    }

    async fn update_task_extra(&self, id: u64, extra: &TaskExtra) -> Result<()> {
        self.with_task(id, |t| t.extra = extra.clone())
    }

    async fn update_task_context(&self, id: u64, context: &TaskContext) -> Result<()> {
        self.with_task(id, |t| t.context = context.clone())
    }
}
