//! Wait: poll the job until it finishes, bounded by the task timeout.

use crate::aop::TuneTrigger;
use crate::backoff::Step;
use crate::core::{PipelineStatus, PipelineTask};
use crate::errors::{ReconcileError, Result};
use crate::ports::{Executor, ExecutorStatus};
use crate::taskrun::{Op, PhaseContext, TaskOp, TaskRun, TuneTriggers};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What the wait poller observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutput {
    /// Terminal status reported by the executor.
    pub observed: ExecutorStatus,
    /// Diagnostics, fetched only for failed jobs.
    pub inspect: Option<String>,
    /// When the job started running, as known to the poller.
    pub began: DateTime<Utc>,
}

/// `Running → Success | Failed | ...`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Wait;

fn finish(run: &mut TaskRun, output: WaitOutput) {
    let now = Utc::now();
    let task = &mut run.task;
    task.status = output.observed.status;
    task.time_end = Some(now);
    let begin = *task.time_begin.get_or_insert(output.began);
    task.cost_time_sec = (now - begin).num_seconds().max(0);
    if !output.observed.desc.is_empty() {
        task.result.status_desc = Some(output.observed.desc);
    }
    if output.inspect.is_some() {
        task.result.inspect = output.inspect;
    }
}

async fn inspect_failed(
    executor: &dyn Executor,
    task: &PipelineTask,
    status: PipelineStatus,
) -> Option<String> {
    if !status.is_failed_status() {
        return None;
    }
    match executor.inspect(task).await {
        Ok(inspect) => Some(inspect),
        Err(err) => {
            warn!(error = %err, "failed to inspect failed job");
            None
        }
    }
}

#[async_trait]
impl TaskOp for Wait {
    type Output = WaitOutput;

    fn op(&self) -> Op {
        Op::Wait
    }

    async fn processing(&self, ctx: PhaseContext) -> Result<WaitOutput> {
        let began = ctx.task.time_begin.unwrap_or_else(Utc::now);
        let executor = &ctx.executor()?;
        let task = &ctx.task;
        let flags = &ctx.flags;
        let observed = ctx
            .config
            .wait_backoff()
            .with_cancel(Arc::clone(&ctx.pipeline_exit))
            .run(|| async move {
                if flags.is_wait_loop_stopped() {
                    return Ok(Step::Abort(ReconcileError::Cancelled(
                        "wait loop stopped".to_string(),
                    )));
                }
                let observed = executor.status(task).await?;
                if observed.status.is_end_status() {
                    Ok(Step::Done(observed))
                } else {
                    Ok(Step::Pending)
                }
            })
            .await?;
        let inspect = inspect_failed(executor.as_ref(), &ctx.task, observed.status).await;
        Ok(WaitOutput {
            observed,
            inspect,
            began,
        })
    }

    async fn when_done(&self, run: &mut TaskRun, output: WaitOutput) -> Result<()> {
        finish(run, output);
        Ok(())
    }

    async fn when_logic_error(&self, run: &mut TaskRun, err: ReconcileError) -> Result<()> {
        if err.is_user_error() {
            run.task.status = PipelineStatus::Failed;
        }
        run.task.result.errors.append(err.to_string());
        Err(err)
    }

    /// Re-checks the executor once, then cancels the job.
    async fn when_timeout(&self, run: &mut TaskRun) -> Result<()> {
        let executor = run.executor()?;
        match executor.status(&run.task).await {
            Ok(observed) if observed.status.is_end_status() => {
                info!(status = %observed.status, "task finished right at its timeout");
                let inspect = inspect_failed(executor.as_ref(), &run.task, observed.status).await;
                let began = run.task.time_begin.unwrap_or_else(Utc::now);
                finish(
                    run,
                    WaitOutput {
                        observed,
                        inspect,
                        began,
                    },
                );
                return Ok(());
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "status re-check before timeout failed"),
        }

        if let Err(err) = executor.cancel(&run.task).await {
            warn!(error = %err, "failed to cancel timed out job");
        }
        let now = Utc::now();
        let task = &mut run.task;
        task.status = PipelineStatus::Timeout;
        task.time_end = Some(now);
        if let Some(begin) = task.time_begin {
            task.cost_time_sec = (now - begin).num_seconds().max(0);
        }
        task.result.errors.append("task timeout");
        Ok(())
    }

    /// Deadline measured from the task's actual start.
    ///
    /// A task without a begin time starts now; the worker snapshot carries
    /// that time through to `finish`.
    fn timeout_config(&self, run: &mut TaskRun) -> Option<Duration> {
        let timeout = run.task.extra.timeout.resolve(run.config.default_task_timeout())?;
        let begin = *run.task.time_begin.get_or_insert_with(Utc::now);
        let elapsed = (Utc::now() - begin).to_std().unwrap_or_default();
        if elapsed >= timeout {
            run.flags.set_fake_timeout();
            return Some(Duration::ZERO);
        }
        Some(timeout - elapsed)
    }

    fn tune_triggers(&self) -> TuneTriggers {
        TuneTriggers {
            before: TuneTrigger::BeforeWait,
            after: TuneTrigger::AfterWait,
        }
    }
}
