//! Writes the outcome of a finished task as a report.

use crate::aop::{TuneContext, TunePoint};
use crate::ports::{Report, ReportKind};
use anyhow::Context as _;
use async_trait::async_trait;
use serde_json::json;

/// Registered name of [`TaskReport`].
pub const TASK_REPORT: &str = "task-report";

/// Reports status, timings and errors of a task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskReport;

#[async_trait]
impl TunePoint for TaskReport {
    fn name(&self) -> &str {
        TASK_REPORT
    }

    async fn handle(&self, ctx: &TuneContext) -> anyhow::Result<()> {
        let task = ctx.task.as_ref().context("task-report needs a task")?;
        let report_service = ctx.report.as_ref().context("no report service")?;

        let errors: Vec<&str> = task
            .result
            .errors
            .records()
            .iter()
            .map(|e| e.msg.as_str())
            .collect();
        let meta = json!({
            "task_name": task.name,
            "action_type": task.action_type,
            "status": task.status.to_string(),
            "executor_kind": task.executor_kind.to_string(),
            "queue_time_sec": task.queue_time_sec,
            "cost_time_sec": task.cost_time_sec,
            "errors": errors,
            "metadata": task.result.metadata,
        });

        report_service
            .create(
                Report::new(ReportKind::TaskResult, ctx.pipeline.id)
                    .with_task(task.id)
                    .with_meta(meta),
            )
            .await
            .context("create task report")?;
        Ok(())
    }
}
