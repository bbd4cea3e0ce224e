//! Persisting the task after a phase.

use super::TaskRun;
use crate::backoff::Step;
use crate::errors::Result;
use crate::events::{TaskEvent, TaskEventKind};
use tracing::warn;

impl TaskRun {
    /// Writes the task and announces the change.
    ///
    /// Store failures are retried until the write lands.
    pub async fn update(&mut self) -> Result<()> {
        let store = &self.ports.store;
        let task = &self.task;
        self.config
            .update_backoff()
            .run(|| async move {
                match store.update_task(task).await {
                    Ok(()) => Ok(Step::Done(())),
                    Err(err) => {
                        warn!(task_id = task.id, error = %err, "failed to update task, retrying");
                        Err(err)
                    }
                }
            })
            .await?;
        self.ports
            .events
            .emit(TaskEvent::new(TaskEventKind::Changed, &self.task))
            .await;
        Ok(())
    }

    /// Appends an error to the live task and persists just the result bag.
    pub async fn append_error(&mut self, msg: impl Into<String>) -> Result<()> {
        self.task.result.errors.append(msg);
        let store = &self.ports.store;
        let task = &self.task;
        self.config
            .update_backoff()
            .run(|| async move {
                match store.update_task_result(task.id, &task.result).await {
                    Ok(()) => Ok(Step::Done(())),
                    Err(err) => {
                        warn!(task_id = task.id, error = %err, "failed to update task result, retrying");
                        Err(err)
                    }
                }
            })
            .await
    }
}
