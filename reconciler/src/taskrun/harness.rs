//! Running one phase.
//!
//! [`TaskRun::run`] spawns a worker for the phase's slow part and waits on
//! whichever comes first: the worker's outcome, the phase deadline, or a
//! cancellation. The matching callback mutates the task, the loop controller
//! gets a look, and the task is persisted.

use super::{Op, PhaseContext, TaskOp, TaskRun};
use crate::core::{PipelineStatus, PipelineTask};
use crate::errors::{ReconcileError, Result};
use crate::observability::PhaseTimer;
use std::any::Any;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{debug, info, info_span, warn, Instrument};

/// What the worker reports back.
enum WorkerOutcome<T> {
    Completed { data: T, latest: PipelineTask },
    Failed(ReconcileError),
    PipelineEnded(PipelineStatus),
    TaskEnded(PipelineTask),
}

/// What the caller observed first.
enum PhaseEvent<T> {
    Completed { data: T, latest: PipelineTask },
    Failed(ReconcileError),
    TimedOut,
    Cancelled(String),
    PipelineEnded(PipelineStatus),
    TaskEnded(PipelineTask),
}

async fn work<O: TaskOp>(op: Arc<O>, ctx: PhaseContext) -> WorkerOutcome<O::Output> {
    match ctx.pipeline_status().await {
        Ok(status) if status.is_end_status() => return WorkerOutcome::PipelineEnded(status),
        Ok(_) => {}
        Err(err) => return WorkerOutcome::Failed(err),
    }

    ctx.fire_hook(op.tune_triggers().before).await;

    let processed = op.processing(ctx.clone()).await;

    let latest = match ctx.latest_task().await {
        Ok(latest) => latest,
        Err(err) => return WorkerOutcome::Failed(err),
    };
    if latest.status.is_end_status() {
        return WorkerOutcome::TaskEnded(latest);
    }

    match processed {
        Ok(data) => WorkerOutcome::Completed { data, latest },
        Err(err) => WorkerOutcome::Failed(err),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn joined<T>(op: Op, joined: std::result::Result<WorkerOutcome<T>, JoinError>) -> PhaseEvent<T> {
    match joined {
        Ok(WorkerOutcome::Completed { data, latest }) => PhaseEvent::Completed { data, latest },
        Ok(WorkerOutcome::Failed(err)) => PhaseEvent::Failed(err),
        Ok(WorkerOutcome::PipelineEnded(status)) => PhaseEvent::PipelineEnded(status),
        Ok(WorkerOutcome::TaskEnded(latest)) => PhaseEvent::TaskEnded(latest),
        Err(err) if err.is_panic() => PhaseEvent::Failed(ReconcileError::Panicked {
            op,
            message: panic_message(&*err.into_panic()),
        }),
        Err(err) => PhaseEvent::Failed(ReconcileError::platform(format!("{op} worker stopped: {err}"))),
    }
}

impl TaskRun {
    /// Runs one phase to completion, timeout or cancellation.
    ///
    /// Returns the first user error if any, otherwise the first platform error.
    /// When every error is a platform error the task's status is put back to
    /// what it was before the call, so the driver can simply call again.
    pub async fn run<O: TaskOp>(&mut self, op: O) -> Result<()> {
        let span = info_span!(
            "task_op",
            op = %op.op(),
            pipeline_id = self.pipeline.id,
            task_id = self.task.id,
            task_name = %self.task.name,
        );
        self.run_phase(Arc::new(op)).instrument(span).await
    }

    async fn run_phase<O: TaskOp>(&mut self, op: Arc<O>) -> Result<()> {
        let kind = op.op();
        let timer = PhaseTimer::start(kind.to_string());
        let status_before = self.task.status;

        let deadline = op.timeout_config(self);
        let ctx = self.phase_context();
        let mut worker = tokio::spawn(work(Arc::clone(&op), ctx).in_current_span());

        let pipeline_exit = Arc::clone(&self.pipeline_exit);
        let cancel = Arc::clone(&self.cancel);
        let timeout = async move {
            match deadline {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timeout);

        let event = tokio::select! {
            biased;
            () = pipeline_exit.cancelled() => PhaseEvent::Cancelled(
                pipeline_exit.reason().unwrap_or_else(|| "pipeline exited".to_string()),
            ),
            () = cancel.cancelled() => PhaseEvent::Cancelled(
                cancel.reason().unwrap_or_else(|| "task cancelled".to_string()),
            ),
            outcome = &mut worker => joined(kind, outcome),
            () = &mut timeout => PhaseEvent::TimedOut,
        };

        let mut errors: Vec<ReconcileError> = Vec::new();
        match event {
            PhaseEvent::Cancelled(reason) => {
                worker.abort();
                self.flags.set_p_exit();
                self.flags.stop_queue_loop();
                self.flags.stop_wait_loop();
                info!(%reason, "phase cancelled");
                return Ok(());
            }
            PhaseEvent::PipelineEnded(status) => {
                self.flags.set_p_exit();
                info!(pipeline_status = %status, "pipeline already ended, skipping phase");
                return Ok(());
            }
            PhaseEvent::TaskEnded(latest) => {
                info!(task_status = %latest.status, "task already ended, skipping phase");
                self.task = latest;
                return Ok(());
            }
            PhaseEvent::Completed { data, latest } => {
                self.task = latest;
                match op.when_done(self, data).await {
                    Ok(()) => self.fire_hook(op.tune_triggers().after).await,
                    Err(err) => errors.push(err),
                }
            }
            PhaseEvent::Failed(err) => {
                if err.is_network() {
                    warn!(error = %err, "phase failed on a network error");
                } else {
                    warn!(error = %err, "phase failed");
                }
                if let Err(err) = op.when_logic_error(self, err).await {
                    errors.push(err);
                }
            }
            PhaseEvent::TimedOut => {
                worker.abort();
                self.flags.stop_queue_loop();
                self.flags.stop_wait_loop();
                warn!(fake = self.flags.is_fake_timeout(), "phase timed out");
                if let Err(err) = op.when_timeout(self).await {
                    errors.push(err);
                }
            }
        }

        if !errors.is_empty() && errors.iter().all(ReconcileError::is_platform_error) {
            debug!(from = %self.task.status, to = %status_before, "rolling back status after platform error");
            self.task.status = status_before;
        }

        self.handle_task_loop().await;
        self.update().await?;

        debug!(status = %self.task.status, elapsed_ms = timer.elapsed_ms(), "phase finished");

        match errors.iter().position(ReconcileError::is_user_error) {
            Some(i) => Err(errors.swap_remove(i)),
            None => errors.into_iter().next().map_or(Ok(()), Err),
        }
    }
}
