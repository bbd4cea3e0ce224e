//! One task, bound to its pipeline, executor and collaborators.
//!
//! A [`TaskRun`] is created for each reconciliation attempt and dropped once
//! the driver is done with it. The driver calls [`TaskRun::run`] once per
//! phase; see `harness.rs` for what happens inside that call.

mod harness;
mod loop_ctl;
pub mod taskop;
mod teardown;
mod update;

pub use loop_ctl::loop_vars;
pub use taskop::{Create, Prepare, Queue, Start, Wait, AGENT_CMD};

use crate::aop::{TuneContext, TuneTrigger};
use crate::backoff::Step;
use crate::cancellation::CancellationToken;
use crate::config::ReconcilerConfig;
use crate::core::{Pipeline, PipelineStatus, PipelineTask};
use crate::errors::{ReconcileError, Result};
use crate::ports::{Executor, ReconcilerPorts};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// The five phases of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    /// Resolve the action and fill the task's runtime fields.
    Prepare,
    /// Materialize the job on the executor.
    Create,
    /// Wait for admission, then start the job.
    Start,
    /// Wait for the job to leave the executor's queue.
    Queue,
    /// Wait for the job to finish.
    Wait,
}

impl Op {
    /// Phase that moves a task out of `status`, if any.
    #[must_use]
    pub fn for_status(status: PipelineStatus) -> Option<Self> {
        match status {
            PipelineStatus::Analyzed => Some(Self::Prepare),
            PipelineStatus::Born => Some(Self::Create),
            PipelineStatus::Created => Some(Self::Start),
            PipelineStatus::Queue => Some(Self::Queue),
            PipelineStatus::Running => Some(Self::Wait),
            _ => None,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Prepare => "prepare",
            Self::Create => "create",
            Self::Start => "start",
            Self::Queue => "queue",
            Self::Wait => "wait",
        };
        f.write_str(name)
    }
}

/// Hook triggers around a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuneTriggers {
    /// Fired by the worker before processing.
    pub before: TuneTrigger,
    /// Fired after a successful `when_done`.
    pub after: TuneTrigger,
}

/// Transient flags of a run, shared with the phase worker.
#[derive(Debug, Default)]
pub struct RunFlags {
    stop_queue_loop: AtomicBool,
    stop_wait_loop: AtomicBool,
    fake_timeout: AtomicBool,
    p_exit: AtomicBool,
}

impl RunFlags {
    /// Asks the queue poller to stop.
    pub fn stop_queue_loop(&self) {
        self.stop_queue_loop.store(true, Ordering::SeqCst);
    }

    /// Asks the wait poller to stop.
    pub fn stop_wait_loop(&self) {
        self.stop_wait_loop.store(true, Ordering::SeqCst);
    }

    /// Records that the timeout had already elapsed when the phase was called.
    pub fn set_fake_timeout(&self) {
        self.fake_timeout.store(true, Ordering::SeqCst);
    }

    /// Records that the pipeline exited while the task was running.
    pub fn set_p_exit(&self) {
        self.p_exit.store(true, Ordering::SeqCst);
    }

    /// Whether the queue poller should stop.
    #[must_use]
    pub fn is_queue_loop_stopped(&self) -> bool {
        self.stop_queue_loop.load(Ordering::SeqCst)
    }

    /// Whether the wait poller should stop.
    #[must_use]
    pub fn is_wait_loop_stopped(&self) -> bool {
        self.stop_wait_loop.load(Ordering::SeqCst)
    }

    /// Whether the timeout had already elapsed when the phase was called.
    #[must_use]
    pub fn is_fake_timeout(&self) -> bool {
        self.fake_timeout.load(Ordering::SeqCst)
    }

    /// Whether the pipeline exited.
    #[must_use]
    pub fn is_p_exit(&self) -> bool {
        self.p_exit.load(Ordering::SeqCst)
    }

    /// Clears every flag.
    pub fn reset(&self) {
        for flag in [
            &self.stop_queue_loop,
            &self.stop_wait_loop,
            &self.fake_timeout,
            &self.p_exit,
        ] {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

/// What the phase worker gets: a snapshot of the task and shared handles.
#[derive(Clone)]
pub struct PhaseContext {
    /// Task as it was when the phase was called.
    pub task: PipelineTask,
    /// Owning pipeline.
    pub pipeline: Arc<Pipeline>,
    /// Executor of the task, once its kind is known.
    pub executor: Option<Arc<dyn Executor>>,
    /// Collaborators.
    pub ports: ReconcilerPorts,
    /// Configuration.
    pub config: Arc<ReconcilerConfig>,
    /// Flags shared with the caller.
    pub flags: Arc<RunFlags>,
    /// Fires when the pipeline exits.
    pub pipeline_exit: Arc<CancellationToken>,
}

impl PhaseContext {
    /// Returns the executor or fails when none is bound.
    pub fn executor(&self) -> Result<Arc<dyn Executor>> {
        bound_executor(self.executor.as_ref(), &self.task)
    }

    /// Reads the pipeline status, retrying store failures.
    pub async fn pipeline_status(&self) -> Result<PipelineStatus> {
        read_pipeline_status(&self.ports, &self.config, &self.pipeline_exit, self.pipeline.id).await
    }

    /// Reads the persisted task, retrying store failures.
    pub async fn latest_task(&self) -> Result<PipelineTask> {
        read_task(&self.ports, &self.config, &self.pipeline_exit, self.task.id).await
    }

    /// Fires a task-scoped hook; failures are logged.
    pub async fn fire_hook(&self, trigger: TuneTrigger) {
        fire_hook(&self.ports, &self.pipeline, &self.task, trigger).await;
    }
}

impl fmt::Debug for PhaseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseContext")
            .field("task_id", &self.task.id)
            .field("pipeline_id", &self.pipeline.id)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// One phase of the task state machine.
///
/// `processing` runs on a spawned worker with a snapshot of the task; the
/// `when_*` callbacks run on the caller and mutate the live task.
#[async_trait]
pub trait TaskOp: Send + Sync + 'static {
    /// Data handed from `processing` to `when_done`.
    type Output: Send + 'static;

    /// Which phase this is.
    fn op(&self) -> Op;

    /// The slow part: talk to the executor or resolve dependencies.
    async fn processing(&self, ctx: PhaseContext) -> Result<Self::Output>;

    /// Applies a successful outcome to the task.
    async fn when_done(&self, run: &mut TaskRun, data: Self::Output) -> Result<()>;

    /// Applies a failure to the task and returns the error to report, if any.
    async fn when_logic_error(&self, run: &mut TaskRun, err: ReconcileError) -> Result<()>;

    /// Handles the phase deadline.
    async fn when_timeout(&self, _run: &mut TaskRun) -> Result<()> {
        Ok(())
    }

    /// Time left before the phase times out; `None` never times out.
    fn timeout_config(&self, _run: &mut TaskRun) -> Option<Duration> {
        None
    }

    /// Hooks fired around the phase.
    fn tune_triggers(&self) -> TuneTriggers;
}

/// A task being reconciled.
pub struct TaskRun {
    /// Live task; persisted after every phase.
    pub task: PipelineTask,
    /// Owning pipeline.
    pub pipeline: Arc<Pipeline>,
    /// Executor of the task, once its kind is known.
    pub executor: Option<Arc<dyn Executor>>,
    /// Collaborators.
    pub ports: ReconcilerPorts,
    /// Configuration.
    pub config: Arc<ReconcilerConfig>,
    /// Transient flags.
    pub flags: Arc<RunFlags>,
    /// Caller-scoped cancellation of this task.
    pub cancel: Arc<CancellationToken>,
    /// Fires for every task of the pipeline when it exits.
    pub pipeline_exit: Arc<CancellationToken>,
}

impl TaskRun {
    /// Creates a run with no executor bound and fresh cancellation tokens.
    #[must_use]
    pub fn new(
        task: PipelineTask,
        pipeline: Arc<Pipeline>,
        ports: ReconcilerPorts,
        config: Arc<ReconcilerConfig>,
    ) -> Self {
        Self {
            task,
            pipeline,
            executor: None,
            ports,
            config,
            flags: Arc::new(RunFlags::default()),
            cancel: Arc::new(CancellationToken::new()),
            pipeline_exit: Arc::new(CancellationToken::new()),
        }
    }

    /// Binds the executor.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Returns the executor or fails when none is bound.
    pub fn executor(&self) -> Result<Arc<dyn Executor>> {
        bound_executor(self.executor.as_ref(), &self.task)
    }

    /// Sets the per-task cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the pipeline exit token.
    #[must_use]
    pub fn with_pipeline_exit(mut self, pipeline_exit: Arc<CancellationToken>) -> Self {
        self.pipeline_exit = pipeline_exit;
        self
    }

    /// Snapshot handed to a phase worker.
    #[must_use]
    pub fn phase_context(&self) -> PhaseContext {
        PhaseContext {
            task: self.task.clone(),
            pipeline: Arc::clone(&self.pipeline),
            executor: self.executor.clone(),
            ports: self.ports.clone(),
            config: Arc::clone(&self.config),
            flags: Arc::clone(&self.flags),
            pipeline_exit: Arc::clone(&self.pipeline_exit),
        }
    }

    /// Reads the pipeline status, retrying store failures.
    pub async fn pipeline_status(&self) -> Result<PipelineStatus> {
        read_pipeline_status(&self.ports, &self.config, &self.pipeline_exit, self.pipeline.id).await
    }

    /// Reads the persisted task, retrying store failures.
    pub async fn latest_task(&self) -> Result<PipelineTask> {
        read_task(&self.ports, &self.config, &self.pipeline_exit, self.task.id).await
    }

    /// Fires a task-scoped hook; failures are logged.
    pub async fn fire_hook(&self, trigger: TuneTrigger) {
        fire_hook(&self.ports, &self.pipeline, &self.task, trigger).await;
    }
}

impl fmt::Debug for TaskRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRun")
            .field("task_id", &self.task.id)
            .field("task_name", &self.task.name)
            .field("status", &self.task.status)
            .field("pipeline_id", &self.pipeline.id)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

fn bound_executor(executor: Option<&Arc<dyn Executor>>, task: &PipelineTask) -> Result<Arc<dyn Executor>> {
    executor
        .cloned()
        .ok_or_else(|| ReconcileError::ExecutorNotFound(task.executor_kind.to_string()))
}

async fn read_pipeline_status(
    ports: &ReconcilerPorts,
    config: &ReconcilerConfig,
    pipeline_exit: &Arc<CancellationToken>,
    pipeline_id: u64,
) -> Result<PipelineStatus> {
    let store = &ports.store;
    config
        .pipeline_status_backoff()
        .with_cancel(Arc::clone(pipeline_exit))
        .run(|| async move {
            match store.get_pipeline_status(pipeline_id).await {
                Ok(status) => Ok(Step::Done(status)),
                Err(err @ ReconcileError::NotFound { .. }) => Ok(Step::Abort(err)),
                Err(err) => {
                    warn!(pipeline_id, error = %err, "failed to read pipeline status, retrying");
                    Err(err)
                }
            }
        })
        .await
}

async fn read_task(
    ports: &ReconcilerPorts,
    config: &ReconcilerConfig,
    pipeline_exit: &Arc<CancellationToken>,
    task_id: u64,
) -> Result<PipelineTask> {
    let store = &ports.store;
    config
        .pipeline_status_backoff()
        .with_cancel(Arc::clone(pipeline_exit))
        .run(|| async move {
            match store.get_task(task_id).await {
                Ok(task) => Ok(Step::Done(task)),
                Err(err @ ReconcileError::NotFound { .. }) => Ok(Step::Abort(err)),
                Err(err) => {
                    warn!(task_id, error = %err, "failed to read task, retrying");
                    Err(err)
                }
            }
        })
        .await
}

async fn fire_hook(
    ports: &ReconcilerPorts,
    pipeline: &Arc<Pipeline>,
    task: &PipelineTask,
    trigger: TuneTrigger,
) {
    let ctx = TuneContext::task(trigger, Arc::clone(pipeline), task.clone())
        .with_report_service(Arc::clone(&ports.report));
    if let Err(err) = ports.tune.handle(&ctx).await {
        warn!(task_id = task.id, %trigger, error = %err, "failed to fire tune hooks");
    }
}
