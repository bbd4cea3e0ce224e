//! Queue: wait for the job to leave the executor's queue.

use crate::aop::TuneTrigger;
use crate::backoff::Step;
use crate::core::PipelineStatus;
use crate::errors::{ReconcileError, Result};
use crate::ports::ExecutorStatus;
use crate::taskrun::{Op, PhaseContext, TaskOp, TaskRun, TuneTriggers};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// `Queue → Running`, also when the job already ended while queued.
#[derive(Debug, Clone, Copy, Default)]
pub struct Queue;

#[async_trait]
impl TaskOp for Queue {
    type Output = ExecutorStatus;

    fn op(&self) -> Op {
        Op::Queue
    }

    async fn processing(&self, ctx: PhaseContext) -> Result<ExecutorStatus> {
        let executor = &ctx.executor()?;
        let task = &ctx.task;
        let flags = &ctx.flags;
        ctx.config
            .queue_backoff()
            .with_cancel(Arc::clone(&ctx.pipeline_exit))
            .run(|| async move {
                if flags.is_queue_loop_stopped() {
                    return Ok(Step::Abort(ReconcileError::Cancelled(
                        "queue loop stopped".to_string(),
                    )));
                }
                let observed = executor.status(task).await?;
                if observed.status == PipelineStatus::Running || observed.status.is_end_status() {
                    return Ok(Step::Done(observed));
                }
                debug!(status = %observed.status, desc = %observed.desc, "task still queued");
                Ok(Step::Pending)
            })
            .await
    }

    /// Marks the job running. A terminal status seen while queued is left for
    /// Wait, which inspects failures and records the run time.
    async fn when_done(&self, run: &mut TaskRun, observed: ExecutorStatus) -> Result<()> {
        let now = Utc::now();
        let task = &mut run.task;
        task.extra.time_end_queue = Some(now);
        if let Some(begin) = task.extra.time_begin_queue {
            task.queue_time_sec = (now - begin).num_seconds().max(0);
        }
        if !observed.desc.is_empty() {
            task.result.status_desc = Some(observed.desc);
        }
        if observed.status.is_end_status() {
            debug!(status = %observed.status, "job ended while queued");
        }
        task.time_begin = Some(now);
        task.status = PipelineStatus::Running;
        Ok(())
    }

    async fn when_logic_error(&self, run: &mut TaskRun, err: ReconcileError) -> Result<()> {
        if err.is_user_error() {
            run.task.status = PipelineStatus::Failed;
        }
        run.task.result.errors.append(err.to_string());
        Err(err)
    }

    fn tune_triggers(&self) -> TuneTriggers {
        TuneTriggers {
            before: TuneTrigger::BeforeQueue,
            after: TuneTrigger::AfterQueue,
        }
    }
}
