//! Create: materialize the job on the executor.

use super::fail_phase;
use crate::aop::TuneTrigger;
use crate::core::PipelineStatus;
use crate::errors::{ReconcileError, Result};
use crate::taskrun::{Op, PhaseContext, TaskOp, TaskRun, TuneTriggers};
use async_trait::async_trait;
use tracing::debug;

/// `Born → Created`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Create;

#[async_trait]
impl TaskOp for Create {
    type Output = ();

    fn op(&self) -> Op {
        Op::Create
    }

    async fn processing(&self, ctx: PhaseContext) -> Result<()> {
        let executor = ctx.executor()?;
        if executor.exist(&ctx.task).await?.created {
            debug!(uuid = %ctx.task.extra.uuid, "job already created, skipping create");
            return Ok(());
        }
        executor.create(&ctx.task).await
    }

    async fn when_done(&self, run: &mut TaskRun, _data: ()) -> Result<()> {
        run.task.status = PipelineStatus::Created;
        Ok(())
    }

    async fn when_logic_error(&self, run: &mut TaskRun, err: ReconcileError) -> Result<()> {
        fail_phase(run, PipelineStatus::CreateError, err)
    }

    fn tune_triggers(&self) -> TuneTriggers {
        TuneTriggers {
            before: TuneTrigger::BeforeCreate,
            after: TuneTrigger::AfterCreate,
        }
    }
}
