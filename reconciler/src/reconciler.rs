//! The outer driver: runs phases until a task reaches an end status.
//!
//! [`TaskReconciler`] owns no task state. Each call to
//! [`TaskReconciler::reconcile_one_task_until_done`] builds a [`TaskRun`],
//! picks the phase matching the task's status, runs it, and repeats. Platform
//! errors are retried after a pause; user errors stop the loop. Whatever the
//! outcome, the run is torn down before returning.
//!
//! Once the pipeline counts as failed, a task that has not ended is skipped
//! with `NoNeedBySystem` unless it carries an `if` condition. A pipeline
//! stopped by the user skips every remaining task.

use crate::backoff::Backoff;
use crate::cancellation::CancellationToken;
use crate::config::ReconcilerConfig;
use crate::core::{Pipeline, PipelineStatus, PipelineTask};
use crate::errors::{ReconcileError, Result};
use crate::ports::{Executor, ExecutorRegistry, ReconcilerPorts};
use crate::taskrun::{Create, Op, Prepare, Queue, Start, TaskRun, Wait};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

/// One task handed to the driver.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Owning pipeline.
    pub pipeline: Arc<Pipeline>,
    /// Task to reconcile.
    pub task: PipelineTask,
    /// Fires for every task of the pipeline when it exits.
    pub pipeline_exit: Arc<CancellationToken>,
    /// Caller-held cancellation of this task only.
    pub cancel: Option<Arc<CancellationToken>>,
    /// Pipeline status as derived from its tasks; the stored status is used when absent.
    pub calculated_status: Option<PipelineStatus>,
}

impl TaskRequest {
    /// Creates a request without a task token or calculated status.
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>, task: PipelineTask, pipeline_exit: Arc<CancellationToken>) -> Self {
        Self {
            pipeline,
            task,
            pipeline_exit,
            cancel: None,
            calculated_status: None,
        }
    }

    /// Sets the per-task cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Sets the pipeline status derived from its tasks.
    #[must_use]
    pub fn with_calculated_status(mut self, status: PipelineStatus) -> Self {
        self.calculated_status = Some(status);
        self
    }
}

/// Drives tasks through their phases.
#[derive(Clone)]
pub struct TaskReconciler {
    ports: ReconcilerPorts,
    executors: Arc<ExecutorRegistry>,
    config: Arc<ReconcilerConfig>,
}

impl std::fmt::Debug for TaskReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskReconciler")
            .field("executors", &self.executors)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskReconciler {
    /// Creates a driver over the given collaborators.
    #[must_use]
    pub fn new(
        ports: ReconcilerPorts,
        executors: Arc<ExecutorRegistry>,
        config: Arc<ReconcilerConfig>,
    ) -> Self {
        Self {
            ports,
            executors,
            config,
        }
    }

    /// Collaborators shared by every run.
    #[must_use]
    pub fn ports(&self) -> &ReconcilerPorts {
        &self.ports
    }

    /// Configuration shared by every run.
    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Reconciles one task until it ends, the pipeline exits, or a user error occurs.
    ///
    /// Returns the task as last seen. A user error is returned after teardown.
    pub async fn reconcile_one_task_until_done(
        &self,
        pipeline: Arc<Pipeline>,
        task: PipelineTask,
        pipeline_exit: Arc<CancellationToken>,
    ) -> Result<PipelineTask> {
        self.reconcile(TaskRequest::new(pipeline, task, pipeline_exit))
            .await
    }

    /// Like [`TaskReconciler::reconcile_one_task_until_done`], with the request's options.
    pub async fn reconcile(&self, request: TaskRequest) -> Result<PipelineTask> {
        let TaskRequest {
            pipeline,
            task,
            pipeline_exit,
            cancel,
            calculated_status,
        } = request;
        let span = info_span!(
            "reconcile_task",
            pipeline_id = pipeline.id,
            task_id = task.id,
            task_name = %task.name,
        );
        async move {
            let mut run = TaskRun::new(task, pipeline, self.ports.clone(), Arc::clone(&self.config))
                .with_pipeline_exit(pipeline_exit);
            if let Some(cancel) = cancel {
                run = run.with_cancel(cancel);
            }
            let outcome = self.drive(&mut run, calculated_status).await;
            run.teardown().await;
            match outcome {
                Ok(()) => {
                    info!(status = %run.task.status, "task reconciled");
                    Ok(run.task)
                }
                Err(err) => {
                    warn!(status = %run.task.status, error = %err, "task reconciliation aborted");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, run: &mut TaskRun, calculated_status: Option<PipelineStatus>) -> Result<()> {
        self.correct_from_executor(run).await;
        self.skip_if_pipeline_failed(run, calculated_status).await?;

        let mut key_registered = false;
        let mut failures: u64 = 0;
        loop {
            if run.task.status.is_end_status() {
                return Ok(());
            }
            if run.flags.is_p_exit() || run.pipeline_exit.is_cancelled() || run.cancel.is_cancelled() {
                info!(status = %run.task.status, "pipeline exited, leaving task as is");
                return Ok(());
            }
            if self.fail_if_errors_exceeded(run).await? {
                return Ok(());
            }

            let Some(op) = Op::for_status(run.task.status) else {
                warn!(status = %run.task.status, "no phase for task status");
                return Ok(());
            };

            if op != Op::Prepare {
                match self.bind_executor(run).await {
                    Ok(()) => {}
                    Err(err @ ReconcileError::ExecutorNotFound(_)) => {
                        self.append_lookup_error(run, &err).await?;
                        if !self.pause(run, failures).await {
                            return Ok(());
                        }
                        failures += 1;
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            if op == Op::Start && !key_registered {
                let key = run.task.throttle_key();
                self.ports
                    .throttler
                    .add_key_to_queues(&key, &run.task.extra.queue_configs);
                debug!(%key, queues = run.task.extra.queue_configs.len(), "registered throttler key");
                key_registered = true;
            }

            let result = match op {
                Op::Prepare => run.run(Prepare).await,
                Op::Create => run.run(Create).await,
                Op::Start => run.run(Start).await,
                Op::Queue => run.run(Queue).await,
                Op::Wait => run.run(Wait).await,
            };

            match result {
                Ok(()) => failures = 0,
                Err(err) if err.is_user_error() => return Err(err),
                Err(err) => {
                    warn!(%op, failures, error = %err, "phase failed, will retry");
                    if !self.pause(run, failures).await {
                        return Ok(());
                    }
                    failures += 1;
                }
            }
        }
    }

    /// Binds the executor for the task's current kind.
    async fn bind_executor(&self, run: &mut TaskRun) -> Result<()> {
        let executor = self.executors.get(run.task.executor_kind)?;
        run.executor = Some(executor);
        Ok(())
    }

    async fn append_lookup_error(&self, run: &mut TaskRun, err: &ReconcileError) -> Result<()> {
        let msg = err.to_string();
        let seen = run
            .task
            .result
            .errors
            .records()
            .iter()
            .find(|record| record.msg == msg)
            .map_or(0, |record| record.ctx.count);
        if usize::try_from(seen).unwrap_or(usize::MAX) >= self.config.err_append_limit {
            warn!(error = %msg, seen, "executor lookup keeps failing");
            return Ok(());
        }
        run.append_error(msg).await
    }

    /// Marks the task `NoNeedBySystem` once the pipeline counts as failed.
    ///
    /// A task with an `if` condition still runs and decides for itself in
    /// Prepare, unless the user stopped the pipeline.
    async fn skip_if_pipeline_failed(
        &self,
        run: &mut TaskRun,
        calculated_status: Option<PipelineStatus>,
    ) -> Result<()> {
        if run.task.status.is_end_status() {
            return Ok(());
        }
        let pipeline_status = match calculated_status {
            Some(status) => status,
            None => match run.pipeline_status().await {
                Ok(status) => status,
                Err(err) => {
                    warn!(error = %err, "cannot read pipeline status before reconcile");
                    return Ok(());
                }
            },
        };
        if !pipeline_status.is_failed_status() {
            return Ok(());
        }
        let has_if = run
            .task
            .extra
            .action
            .if_expr
            .as_deref()
            .is_some_and(|expr| !expr.trim().is_empty());
        if has_if && pipeline_status != PipelineStatus::StopByUser {
            debug!(%pipeline_status, "pipeline failed, task keeps its if condition");
            return Ok(());
        }
        info!(%pipeline_status, "pipeline failed, task not needed");
        run.task.status = PipelineStatus::NoNeedBySystem;
        run.update().await
    }

    /// Fails the task when one error has repeated too often or for too long.
    async fn fail_if_errors_exceeded(&self, run: &mut TaskRun) -> Result<bool> {
        let exceeded = run
            .task
            .result
            .errors
            .exceeded(self.config.error_exceed_count, self.config.error_exceed_span())
            .map(|record| (record.msg.clone(), record.ctx.count));
        let Some((msg, count)) = exceeded else {
            return Ok(false);
        };
        warn!(error = %msg, count, "task errors exceeded, failing task");
        run.task.status = PipelineStatus::Failed;
        run.task.time_end = Some(Utc::now());
        run.task
            .result
            .errors
            .append(format!("errors exceeded limit, last error: {msg}"));
        run.update().await?;
        Ok(true)
    }

    /// Adopts a terminal status the executor already reports.
    ///
    /// Only tasks whose job may exist are checked. Abnormal failures such as
    /// `Lost` or `Unknown` are ignored so the phases can look at them.
    async fn correct_from_executor(&self, run: &mut TaskRun) {
        if !matches!(
            run.task.status,
            PipelineStatus::Created | PipelineStatus::Queue | PipelineStatus::Running
        ) {
            return;
        }
        let executor: Arc<dyn Executor> = match self.executors.get(run.task.executor_kind) {
            Ok(executor) => executor,
            Err(err) => {
                debug!(error = %err, "no executor to correct status from");
                return;
            }
        };
        match executor.exist(&run.task).await {
            Ok(existence) if existence.created => {}
            Ok(_) => return,
            Err(err) => {
                warn!(error = %err, "cannot check job existence before reconcile");
                return;
            }
        }
        let observed = match executor.status(&run.task).await {
            Ok(observed) => observed,
            Err(err) => {
                warn!(error = %err, "cannot read job status before reconcile");
                return;
            }
        };
        if !observed.status.is_end_status() || observed.status.is_abnormal_failed_status() {
            return;
        }
        info!(from = %run.task.status, to = %observed.status, "correcting task status from executor");
        run.task.status = observed.status;
        run.task.time_end = Some(Utc::now());
        if !observed.desc.is_empty() {
            run.task.result.status_desc = Some(observed.desc);
        }
        if let Err(err) = run.update().await {
            warn!(error = %err, "failed to persist corrected status");
        }
    }

    /// Interval before retrying after `failures` consecutive platform errors.
    #[must_use]
    pub fn retry_interval(&self, task: &PipelineTask, failures: u64) -> Duration {
        let backoff = match &task.extra.loop_options {
            Some(options) => {
                let strategy = options.strategy();
                Backoff::new()
                    .with_interval(Duration::from_secs(strategy.interval_sec))
                    .with_decline_ratio(strategy.decline_ratio)
                    .with_decline_limit(Duration::from_secs(strategy.decline_limit_sec))
            }
            None => self.config.retry_backoff(),
        };
        backoff
            .calculate_interval(failures)
            .max(Duration::from_secs(self.config.abnormal_retry_floor_secs))
    }

    /// Sleeps before a retry. Returns false when the pipeline or task was cancelled.
    async fn pause(&self, run: &TaskRun, failures: u64) -> bool {
        let interval = self.retry_interval(&run.task, failures);
        let pipeline_exit = Arc::clone(&run.pipeline_exit);
        let cancel = Arc::clone(&run.cancel);
        tokio::select! {
            () = pipeline_exit.cancelled() => false,
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(interval) => true,
        }
    }
}
