//! Start: wait for throttler admission, then start the job.

use super::fail_phase;
use crate::aop::TuneTrigger;
use crate::backoff::Step;
use crate::core::PipelineStatus;
use crate::errors::{ReconcileError, Result};
use crate::taskrun::{Op, PhaseContext, TaskOp, TaskRun, TuneTriggers};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// `Created → Queue`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Start;

#[async_trait]
impl TaskOp for Start {
    type Output = ();

    fn op(&self) -> Op {
        Op::Start
    }

    async fn processing(&self, ctx: PhaseContext) -> Result<()> {
        let key = ctx.task.throttle_key();
        let throttler = &ctx.ports.throttler;
        ctx.config
            .admission_backoff()
            .with_cancel(Arc::clone(&ctx.pipeline_exit))
            .run(|| {
                let admission = throttler.pop_pending(&key);
                async move {
                    if admission.admitted {
                        Ok(Step::Done(()))
                    } else {
                        debug!(detail = %admission.detail, "waiting for throttler admission");
                        Ok(Step::Pending)
                    }
                }
            })
            .await?;

        let executor = ctx.executor()?;
        if executor.exist(&ctx.task).await?.started {
            debug!(uuid = %ctx.task.extra.uuid, "job already started, skipping start");
            return Ok(());
        }
        executor.start(&ctx.task).await
    }

    async fn when_done(&self, run: &mut TaskRun, _data: ()) -> Result<()> {
        run.task.status = PipelineStatus::Queue;
        run.task.extra.time_begin_queue = Some(Utc::now());
        Ok(())
    }

    async fn when_logic_error(&self, run: &mut TaskRun, err: ReconcileError) -> Result<()> {
        fail_phase(run, PipelineStatus::StartError, err)
    }

    fn tune_triggers(&self) -> TuneTriggers {
        TuneTriggers {
            before: TuneTrigger::BeforeStart,
            after: TuneTrigger::AfterStart,
        }
    }
}
