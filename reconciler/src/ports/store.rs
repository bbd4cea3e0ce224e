//! Persistence port.

use crate::core::{PipelineStatus, PipelineTask, TaskContext, TaskExtra, TaskResult};
use crate::errors::Result;
use async_trait::async_trait;

/// Task and pipeline persistence.
///
/// The sub-document writers exist so a crash between writes leaves a
/// recoverable partial record instead of a corrupt one.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetches one task.
    async fn get_task(&self, id: u64) -> Result<PipelineTask>;

    /// Writes the whole task record.
    async fn update_task(&self, task: &PipelineTask) -> Result<()>;

    /// Lists every task of a pipeline.
    async fn list_tasks(&self, pipeline_id: u64) -> Result<Vec<PipelineTask>>;

    /// Fetches the current status of a pipeline.
    async fn get_pipeline_status(&self, pipeline_id: u64) -> Result<PipelineStatus>;

    /// Writes only the result bag.
    async fn update_task_result(&self, id: u64, result: &TaskResult) -> Result<()>;

    /// Writes only the extra bag.
    async fn update_task_extra(&self, id: u64, extra: &TaskExtra) -> Result<()>;

    /// Writes only the context bag.
    async fn update_task_context(&self, id: u64, context: &TaskContext) -> Result<()>;

    /// Appends an error message to the persisted result.
    async fn append_task_error(&self, id: u64, msg: &str) -> Result<()> {
        let mut task = self.get_task(id).await?;
        task.result.errors.append(msg);
        self.update_task_result(id, &task.result).await
    }
}
