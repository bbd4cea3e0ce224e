//! End-to-end tests of the reconciler over in-memory collaborators.

use crate::aop::{TuneConfig, TuneContext, TuneEngineBuilder, TunePoint, TuneScope, TuneTrigger};
use crate::cancellation::CancellationToken;
use crate::config::ReconcilerConfig;
use crate::core::{
    ExecutorKind, LoopOptions, LoopStrategy, Pipeline, PipelineStatus, PipelineTask, StorageRef,
    TaskLoop, TaskTimeout,
};
use crate::errors::ReconcileError;
use crate::events::TaskEventKind;
use crate::ports::{
    Admission, ExecutorRegistry, Existence, InMemoryThrottler, MockExecutor, MockThrottler,
    ReconcilerPorts, ReportKind, ResolvedAction,
};
use crate::reconciler::{TaskReconciler, TaskRequest};
use crate::taskrun::taskop::fail_phase;
use crate::taskrun::{
    Create, Op, PhaseContext, Start, TaskOp, TaskRun, TuneTriggers, Wait, AGENT_CMD,
};
use crate::testing::{
    CollectingEventSink, InMemoryTaskStore, RecordingReportService, ScriptedExecutor,
    StaticActionResolver,
};
use async_trait::async_trait;
use mockall::Sequence;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PIPELINE_ID: u64 = 100;

fn fast_config() -> ReconcilerConfig {
    ReconcilerConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_store_retry(Duration::from_millis(10))
        .with_retry_interval(Duration::ZERO, Duration::ZERO)
}

struct Fixture {
    store: Arc<InMemoryTaskStore>,
    executor: Arc<ScriptedExecutor>,
    reports: Arc<RecordingReportService>,
    events: Arc<CollectingEventSink>,
    pipeline: Arc<Pipeline>,
    ports: ReconcilerPorts,
    config: Arc<ReconcilerConfig>,
}

impl Fixture {
    fn new(executor: ScriptedExecutor, resolver: StaticActionResolver) -> Self {
        Self::with_config(executor, resolver, fast_config())
    }

    fn with_config(
        executor: ScriptedExecutor,
        resolver: StaticActionResolver,
        config: ReconcilerConfig,
    ) -> Self {
        let store = Arc::new(InMemoryTaskStore::new());
        let pipeline = Arc::new(Pipeline::new(PIPELINE_ID, "local"));
        store.insert_pipeline(&pipeline);
        let reports = Arc::new(RecordingReportService::new());
        let events = Arc::new(CollectingEventSink::new());
        let ports = ReconcilerPorts::new(
            store.clone(),
            Arc::new(InMemoryThrottler::new()),
            Arc::new(resolver),
        )
        .with_report_service(reports.clone())
        .with_event_sink(events.clone());
        Self {
            store,
            executor: Arc::new(executor),
            reports,
            events,
            pipeline,
            ports,
            config: Arc::new(config),
        }
    }

    fn task(&self, id: u64, status: PipelineStatus) -> PipelineTask {
        PipelineTask::new(id, PIPELINE_ID, format!("task-{id}"))
            .with_action("shell", "1.0")
            .with_status(status)
            .with_executor_kind(ExecutorKind::Docker)
    }

    fn run_for(&self, task: PipelineTask) -> TaskRun {
        self.store.insert_task(task.clone());
        TaskRun::new(task, self.pipeline.clone(), self.ports.clone(), self.config.clone())
            .with_executor(self.executor.clone())
    }

    fn reconciler(&self) -> TaskReconciler {
        let executors = ExecutorRegistry::new().with_executor(self.executor.clone());
        TaskReconciler::new(self.ports.clone(), Arc::new(executors), self.config.clone())
    }

    async fn reconcile(&self, task: PipelineTask) -> crate::errors::Result<PipelineTask> {
        self.store.insert_task(task.clone());
        self.reconciler()
            .reconcile_one_task_until_done(
                self.pipeline.clone(),
                task,
                Arc::new(CancellationToken::new()),
            )
            .await
    }
}

fn docker_action() -> ResolvedAction {
    ResolvedAction {
        image: "alpine:3.19".to_string(),
        executor_kind: ExecutorKind::Docker,
        ..ResolvedAction::default()
    }
}

#[tokio::test]
async fn test_born_task_reaches_success_with_one_write_per_phase() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker)
            .with_statuses([PipelineStatus::Running, PipelineStatus::Success]),
        StaticActionResolver::default(),
    );

    let task = fx.reconcile(fx.task(1, PipelineStatus::Born)).await.unwrap();

    assert_eq!(task.status, PipelineStatus::Success);
    assert_eq!(fx.store.update_count(), 4);
    assert_eq!(fx.executor.create_calls(), 1);
    assert_eq!(fx.executor.start_calls(), 1);
    assert_eq!(fx.executor.status_calls(), 2);
    assert_eq!(fx.executor.inspect_calls(), 0);

    let statuses: Vec<PipelineStatus> = fx
        .events
        .events_of_kind(TaskEventKind::Changed)
        .into_iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            PipelineStatus::Created,
            PipelineStatus::Queue,
            PipelineStatus::Running,
            PipelineStatus::Success,
        ]
    );

    let stored = fx.store.task(1).unwrap();
    assert!(stored.time_begin.is_some());
    assert!(stored.time_end.is_some());
    assert!(stored.extra.time_begin_queue.is_some());
    assert!(stored.extra.time_end_queue.is_some());
}

#[tokio::test]
async fn test_analyzed_task_is_prepared_then_run() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker)
            .with_statuses([PipelineStatus::Running, PipelineStatus::Success]),
        StaticActionResolver::new(docker_action()),
    );
    let mut task = fx.task(7, PipelineStatus::Analyzed);
    task.executor_kind = ExecutorKind::K8sJob;
    task.extra.action.namespaces = vec!["artifacts".to_string()];

    let task = fx.reconcile(task).await.unwrap();

    assert_eq!(task.status, PipelineStatus::Success);
    assert_eq!(task.executor_kind, ExecutorKind::Docker);
    assert_eq!(task.extra.uuid, "pipeline-task-7");
    assert_eq!(task.extra.image, "alpine:3.19");
    assert_eq!(task.extra.cmd, AGENT_CMD);
    assert_eq!(task.extra.cmd_args.len(), 1);
    assert_eq!(
        task.extra.public_envs.get("PIPELINE_ID").map(String::as_str),
        Some("100")
    );
    assert_eq!(
        task.context.out_storages,
        vec![StorageRef {
            name: "artifacts".to_string(),
            value: "pipeline-100/task-7/artifacts".to_string(),
            labels: [("stageOrder".to_string(), "0".to_string())].into(),
        }]
    );
    assert_eq!(fx.store.update_count(), 5);
}

#[tokio::test]
async fn test_false_if_condition_skips_task() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker),
        StaticActionResolver::new(docker_action()),
    );
    let mut task = fx.task(2, PipelineStatus::Analyzed);
    task.extra.action.if_expr = Some("pipeline_status == 'Failed'".to_string());

    let task = fx.reconcile(task).await.unwrap();

    assert_eq!(task.status, PipelineStatus::NoNeedBySystem);
    assert_eq!(fx.executor.create_calls(), 0);
}

#[tokio::test]
async fn test_user_error_in_prepare_aborts() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker),
        StaticActionResolver::default().with_user_error("action shell@9.9 does not exist"),
    );

    let err = fx
        .reconcile(fx.task(3, PipelineStatus::Analyzed))
        .await
        .unwrap_err();

    assert!(err.is_user_error());
    let stored = fx.store.task(3).unwrap();
    assert_eq!(stored.status, PipelineStatus::AnalyzeFailed);
    assert_eq!(
        stored.result.errors.last().map(|e| e.msg.as_str()),
        Some("action shell@9.9 does not exist")
    );
}

#[tokio::test]
async fn test_need_retry_keeps_task_analyzed_until_resolved() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker)
            .with_statuses([PipelineStatus::Running, PipelineStatus::Success]),
        StaticActionResolver::new(docker_action()).with_need_retries(2),
    );

    let task = fx.reconcile(fx.task(4, PipelineStatus::Analyzed)).await.unwrap();

    assert_eq!(task.status, PipelineStatus::Success);
    let analyzed_writes = fx
        .events
        .events_of_kind(TaskEventKind::Changed)
        .into_iter()
        .filter(|e| e.status == PipelineStatus::Analyzed)
        .count();
    assert_eq!(analyzed_writes, 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_cancels_job_once() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker).with_statuses([PipelineStatus::Running]),
        StaticActionResolver::default(),
    );
    let task = fx
        .task(5, PipelineStatus::Born)
        .with_timeout(TaskTimeout::After(Duration::from_secs(1)));

    let task = fx.reconcile(task).await.unwrap();

    assert_eq!(task.status, PipelineStatus::Timeout);
    assert_eq!(fx.executor.cancel_calls(), 1);
    assert_eq!(
        task.result.errors.last().map(|e| e.msg.as_str()),
        Some("task timeout")
    );
}

#[tokio::test(start_paused = true)]
async fn test_job_finishing_at_timeout_keeps_its_status() {
    let config = fast_config().with_poll_interval(Duration::from_secs(3600));
    let fx = Fixture::with_config(
        ScriptedExecutor::new(ExecutorKind::Docker)
            .with_statuses([PipelineStatus::Running, PipelineStatus::Success]),
        StaticActionResolver::default(),
        config,
    );
    let mut task = fx
        .task(6, PipelineStatus::Running)
        .with_timeout(TaskTimeout::After(Duration::from_secs(1)));
    task.time_begin = Some(chrono::Utc::now());
    let mut run = fx.run_for(task);

    run.run(Wait).await.unwrap();

    assert_eq!(run.task.status, PipelineStatus::Success);
    assert_eq!(fx.executor.cancel_calls(), 0);
    assert_eq!(fx.store.task(6).unwrap().status, PipelineStatus::Success);
}

#[tokio::test]
async fn test_platform_error_rolls_status_back() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker).with_failing_creates(1),
        StaticActionResolver::default(),
    );
    let mut run = fx.run_for(fx.task(8, PipelineStatus::Born));

    let err = run.run(Create).await.unwrap_err();

    assert!(err.is_platform_error());
    assert_eq!(run.task.status, PipelineStatus::Born);
    let stored = fx.store.task(8).unwrap();
    assert_eq!(stored.status, PipelineStatus::Born);
    assert_eq!(
        stored.result.errors.last().map(|e| e.msg.as_str()),
        Some("executor refused create")
    );
}

#[tokio::test]
async fn test_driver_retries_platform_errors() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker)
            .with_failing_creates(2)
            .with_statuses([PipelineStatus::Running, PipelineStatus::Success]),
        StaticActionResolver::default(),
    );

    let task = fx.reconcile(fx.task(9, PipelineStatus::Born)).await.unwrap();

    assert_eq!(task.status, PipelineStatus::Success);
    assert_eq!(fx.executor.create_calls(), 3);
    assert_eq!(task.result.errors.records()[0].ctx.count, 2);
}

#[tokio::test]
async fn test_existing_job_is_not_created_again() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker)
            .with_existing_job(false)
            .with_statuses([PipelineStatus::Running, PipelineStatus::Success]),
        StaticActionResolver::default(),
    );

    let task = fx.reconcile(fx.task(10, PipelineStatus::Born)).await.unwrap();

    assert_eq!(task.status, PipelineStatus::Success);
    assert_eq!(fx.executor.create_calls(), 0);
    assert_eq!(fx.executor.start_calls(), 1);
}

#[tokio::test]
async fn test_terminal_executor_status_is_adopted_before_reconcile() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker)
            .with_existing_job(true)
            .with_statuses([PipelineStatus::Failed]),
        StaticActionResolver::default(),
    );

    let task = fx.reconcile(fx.task(11, PipelineStatus::Queue)).await.unwrap();

    assert_eq!(task.status, PipelineStatus::Failed);
    assert_eq!(fx.executor.status_calls(), 1);
    assert_eq!(fx.store.update_count(), 1);
}

#[tokio::test]
async fn test_abnormal_executor_status_is_not_adopted() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker)
            .with_existing_job(true)
            .with_statuses([PipelineStatus::Lost, PipelineStatus::Success]),
        StaticActionResolver::default(),
    );

    let task = fx.reconcile(fx.task(12, PipelineStatus::Running)).await.unwrap();

    assert_eq!(task.status, PipelineStatus::Success);
}

#[tokio::test]
async fn test_repeated_errors_fail_the_task() {
    let mut config = fast_config();
    config.error_exceed_count = 2;
    let fx = Fixture::with_config(
        ScriptedExecutor::new(ExecutorKind::Docker),
        StaticActionResolver::default(),
        config,
    );
    let mut task = fx.task(13, PipelineStatus::Born);
    task.result.errors.append("registry unreachable");
    task.result.errors.append("registry unreachable");

    let task = fx.reconcile(task).await.unwrap();

    assert_eq!(task.status, PipelineStatus::Failed);
    assert_eq!(fx.executor.create_calls(), 0);
    assert_eq!(fx.store.update_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_executor_errors_stop_being_appended() {
    let mut config = fast_config().with_retry_interval(Duration::from_secs(1), Duration::ZERO);
    config.err_append_limit = 3;
    let fx = Fixture::with_config(
        ScriptedExecutor::new(ExecutorKind::Docker),
        StaticActionResolver::default(),
        config,
    );
    let task = fx.task(14, PipelineStatus::Born).with_executor_kind(ExecutorKind::K8sSpark);
    fx.store.insert_task(task.clone());
    let exit = Arc::new(CancellationToken::new());
    let canceller = {
        let exit = exit.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            exit.cancel("pipeline stopped");
        })
    };

    let task = fx
        .reconciler()
        .reconcile_one_task_until_done(fx.pipeline.clone(), task, exit)
        .await
        .unwrap();
    canceller.await.unwrap();

    assert_eq!(task.status, PipelineStatus::Born);
    let stored = fx.store.task(14).unwrap();
    let record = stored.result.errors.last().unwrap();
    assert_eq!(record.msg, "executor not found: k8sspark");
    assert_eq!(record.ctx.count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_exit_stops_waiting() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker).with_statuses([PipelineStatus::Running]),
        StaticActionResolver::default(),
    );
    let task = fx.task(15, PipelineStatus::Born);
    fx.store.insert_task(task.clone());
    let exit = Arc::new(CancellationToken::new());
    let canceller = {
        let exit = exit.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            exit.cancel("pipeline stopped");
        })
    };

    let task = fx
        .reconciler()
        .reconcile_one_task_until_done(fx.pipeline.clone(), task, exit)
        .await
        .unwrap();
    canceller.await.unwrap();

    assert_eq!(task.status, PipelineStatus::Running);
    assert_eq!(fx.executor.cancel_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_loop_reset_clears_the_round() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker)
            .with_statuses([PipelineStatus::Failed])
            .with_inspect("exit code 1"),
        StaticActionResolver::default(),
    );
    let mut task = fx.task(16, PipelineStatus::Running);
    task.time_begin = Some(chrono::Utc::now());
    task.extra.time_begin_queue = Some(chrono::Utc::now());
    task.queue_time_sec = 3;
    task.context.out_storages.push(StorageRef {
        name: "artifacts".to_string(),
        value: "pipeline-100/task-16/artifacts".to_string(),
        labels: Default::default(),
    });
    task.extra.loop_options = LoopOptions::resolve(
        None,
        Some(TaskLoop {
            break_expr: String::new(),
            strategy: Some(LoopStrategy {
                max_times: 3,
                decline_ratio: 1.0,
                decline_limit_sec: 1,
                interval_sec: 1,
            }),
        }),
    );
    let mut run = fx.run_for(task);

    run.run(Wait).await.unwrap();

    let task = &run.task;
    assert_eq!(task.status, PipelineStatus::Analyzed);
    assert!(task.time_begin.is_none());
    assert!(task.time_end.is_none());
    assert!(task.extra.time_begin_queue.is_none());
    assert_eq!(task.queue_time_sec, 0);
    assert_eq!(task.cost_time_sec, 0);
    assert!(task.result.errors.is_empty());
    assert!(task.result.inspect.is_none());
    assert!(task.context.is_empty());
    assert_eq!(task.extra.loop_options.as_ref().map(|o| o.looped_times), Some(2));

    assert_eq!(fx.executor.inspect_calls(), 1);
    assert_eq!(fx.events.events_of_kind(TaskEventKind::LoopReset).len(), 1);
    let rounds = fx.reports.reports_of_kind(ReportKind::TaskLoopRound);
    assert_eq!(rounds.len(), 1);
    assert_eq!(rounds[0].meta["status"], "Failed");
    assert_eq!(fx.store.task(16).unwrap().status, PipelineStatus::Analyzed);
}

#[tokio::test(start_paused = true)]
async fn test_loop_stops_once_break_condition_holds() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker).with_statuses([PipelineStatus::Success]),
        StaticActionResolver::default(),
    );
    let mut task = fx.task(17, PipelineStatus::Running);
    task.extra.loop_options = LoopOptions::resolve(None, Some(TaskLoop::default()));
    let mut run = fx.run_for(task);

    run.run(Wait).await.unwrap();

    assert_eq!(run.task.status, PipelineStatus::Success);
    assert!(fx.events.events_of_kind(TaskEventKind::LoopReset).is_empty());
}

struct Exploding;

#[async_trait]
impl TunePoint for Exploding {
    fn name(&self) -> &str {
        "exploding"
    }

    async fn handle(&self, _ctx: &TuneContext) -> anyhow::Result<()> {
        anyhow::bail!("hook blew up")
    }
}

#[derive(Default)]
struct Counting(AtomicUsize);

#[async_trait]
impl TunePoint for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    async fn handle(&self, _ctx: &TuneContext) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_failing_hook_does_not_block_siblings_or_phase() {
    let counting = Arc::new(Counting::default());
    let mut builder = TuneEngineBuilder::new();
    builder.register(TuneScope::Task, Arc::new(Exploding)).unwrap();
    builder.register(TuneScope::Task, counting.clone()).unwrap();
    let engine = builder
        .build(&TuneConfig::empty().with_hooks(
            TuneScope::Task,
            TuneTrigger::AfterCreate,
            ["exploding", "counting"],
        ))
        .unwrap();
    let mut fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker),
        StaticActionResolver::default(),
    );
    fx.ports = fx.ports.clone().with_tune_engine(Arc::new(engine));
    let mut run = fx.run_for(fx.task(18, PipelineStatus::Born));

    run.run(Create).await.unwrap();

    assert_eq!(run.task.status, PipelineStatus::Created);
    assert_eq!(counting.0.load(Ordering::SeqCst), 1);

    let ctx = TuneContext::task(TuneTrigger::AfterCreate, fx.pipeline.clone(), run.task.clone());
    let outcome = fx.ports.tune.handle_with_outcome(&ctx).await.unwrap();
    assert_eq!(outcome.succeeded, vec!["counting".to_string()]);
    assert_eq!(outcome.failed.len(), 1);
}

#[tokio::test]
async fn test_task_report_written_after_exec() {
    let config = fast_config();
    let engine = TuneEngineBuilder::with_builtins().build(&config.tune).unwrap();
    let mut fx = Fixture::with_config(
        ScriptedExecutor::new(ExecutorKind::Docker)
            .with_statuses([PipelineStatus::Running, PipelineStatus::Success]),
        StaticActionResolver::default(),
        config,
    );
    fx.ports = fx.ports.clone().with_tune_engine(Arc::new(engine));

    fx.reconcile(fx.task(19, PipelineStatus::Born)).await.unwrap();

    let reports = fx.reports.reports_of_kind(ReportKind::TaskResult);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].task_id, Some(19));
    assert_eq!(reports[0].pipeline_id, PIPELINE_ID);
}

#[tokio::test]
async fn test_start_waits_for_admission() {
    let mut seq = Sequence::new();
    let mut throttler = MockThrottler::new();
    let mut executor = MockExecutor::new();
    throttler
        .expect_pop_pending()
        .times(2)
        .in_sequence(&mut seq)
        .returning(|_| Admission::denied("window full"));
    throttler
        .expect_pop_pending()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Admission::granted("admitted"));
    executor
        .expect_exist()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(Existence::default()));
    executor
        .expect_start()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));

    let store = Arc::new(InMemoryTaskStore::new());
    let pipeline = Arc::new(Pipeline::new(PIPELINE_ID, "local"));
    store.insert_pipeline(&pipeline);
    let task = PipelineTask::new(20, PIPELINE_ID, "deploy").with_status(PipelineStatus::Created);
    store.insert_task(task.clone());
    let ports = ReconcilerPorts::new(
        store.clone(),
        Arc::new(throttler),
        Arc::new(StaticActionResolver::default()),
    );
    let mut run = TaskRun::new(task, pipeline, ports, Arc::new(fast_config()))
        .with_executor(Arc::new(executor));

    run.run(Start).await.unwrap();

    assert_eq!(run.task.status, PipelineStatus::Queue);
    assert!(run.task.extra.time_begin_queue.is_some());
}

#[tokio::test]
async fn test_phase_without_executor_is_a_platform_error() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker),
        StaticActionResolver::default(),
    );
    let task = fx.task(21, PipelineStatus::Born);
    fx.store.insert_task(task.clone());
    let mut run = TaskRun::new(task, fx.pipeline.clone(), fx.ports.clone(), fx.config.clone());

    let err = run.run(Create).await.unwrap_err();

    assert!(matches!(err, ReconcileError::ExecutorNotFound(_)));
    assert_eq!(run.task.status, PipelineStatus::Born);
}

#[tokio::test]
async fn test_job_failing_while_queued_keeps_its_diagnostics() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker)
            .with_statuses([PipelineStatus::Failed])
            .with_inspect("OOMKilled"),
        StaticActionResolver::default(),
    );

    let task = fx.reconcile(fx.task(22, PipelineStatus::Born)).await.unwrap();

    assert_eq!(task.status, PipelineStatus::Failed);
    assert_eq!(task.result.inspect.as_deref(), Some("OOMKilled"));
    assert_eq!(fx.executor.inspect_calls(), 1);
    let stored = fx.store.task(22).unwrap();
    assert_eq!(stored.result.inspect.as_deref(), Some("OOMKilled"));
    assert!(stored.time_begin.is_some());
    assert!(stored.time_end >= stored.time_begin);
}

#[tokio::test]
async fn test_wait_records_begin_time_when_missing() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker).with_statuses([PipelineStatus::Success]),
        StaticActionResolver::default(),
    );
    let task = fx
        .task(23, PipelineStatus::Running)
        .with_timeout(TaskTimeout::After(Duration::from_secs(3600)));
    let mut run = fx.run_for(task);

    run.run(Wait).await.unwrap();

    assert_eq!(run.task.status, PipelineStatus::Success);
    assert!(run.task.time_begin.is_some());
    assert!(run.task.time_end >= run.task.time_begin);
    let stored = fx.store.task(23).unwrap();
    assert_eq!(stored.time_begin, run.task.time_begin);
    assert!(stored.cost_time_sec >= 0);
}

struct Panicking;

#[async_trait]
impl TaskOp for Panicking {
    type Output = ();

    fn op(&self) -> Op {
        Op::Create
    }

    async fn processing(&self, _ctx: PhaseContext) -> crate::errors::Result<()> {
        panic!("kaboom");
    }

    async fn when_done(&self, run: &mut TaskRun, _data: ()) -> crate::errors::Result<()> {
        run.task.status = PipelineStatus::Created;
        Ok(())
    }

    async fn when_logic_error(
        &self,
        run: &mut TaskRun,
        err: ReconcileError,
    ) -> crate::errors::Result<()> {
        fail_phase(run, PipelineStatus::CreateError, err)
    }

    fn tune_triggers(&self) -> TuneTriggers {
        TuneTriggers {
            before: TuneTrigger::BeforeCreate,
            after: TuneTrigger::AfterCreate,
        }
    }
}

#[tokio::test]
async fn test_panicking_phase_is_a_platform_error() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker),
        StaticActionResolver::default(),
    );
    let mut run = fx.run_for(fx.task(24, PipelineStatus::Born));

    let err = run.run(Panicking).await.unwrap_err();

    match &err {
        ReconcileError::Panicked { op, message } => {
            assert_eq!(*op, Op::Create);
            assert_eq!(message, "kaboom");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_platform_error());
    assert_eq!(run.task.status, PipelineStatus::Born);
    let stored = fx.store.task(24).unwrap();
    assert_eq!(stored.status, PipelineStatus::Born);
    assert_eq!(
        stored.result.errors.last().map(|e| e.msg.as_str()),
        Some("create panicked: kaboom")
    );
}

#[tokio::test]
async fn test_ended_pipeline_skips_phase_without_writing() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker),
        StaticActionResolver::default(),
    );
    fx.store.set_pipeline_status(PIPELINE_ID, PipelineStatus::StopByUser);
    let mut run = fx.run_for(fx.task(25, PipelineStatus::Born));

    run.run(Create).await.unwrap();

    assert_eq!(run.task.status, PipelineStatus::Born);
    assert!(run.flags.is_p_exit());
    assert_eq!(fx.executor.create_calls(), 0);
    assert_eq!(fx.store.update_count(), 0);
}

#[tokio::test]
async fn test_task_ended_elsewhere_is_adopted_without_writing() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker),
        StaticActionResolver::default(),
    );
    let task = fx.task(26, PipelineStatus::Born);
    let mut run = fx.run_for(task.clone());
    fx.store.insert_task(task.with_status(PipelineStatus::Success));

    run.run(Create).await.unwrap();

    assert_eq!(run.task.status, PipelineStatus::Success);
    assert!(!run.flags.is_p_exit());
    assert_eq!(fx.store.update_count(), 0);
    assert_eq!(fx.store.task(26).unwrap().status, PipelineStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_deadline_times_out_immediately() {
    let config = fast_config().with_poll_interval(Duration::from_secs(3600));
    let fx = Fixture::with_config(
        ScriptedExecutor::new(ExecutorKind::Docker).with_statuses([PipelineStatus::Running]),
        StaticActionResolver::default(),
        config,
    );
    let mut task = fx
        .task(27, PipelineStatus::Running)
        .with_timeout(TaskTimeout::After(Duration::from_secs(1)));
    task.time_begin = Some(chrono::Utc::now() - chrono::Duration::hours(2));
    let mut run = fx.run_for(task);

    run.run(Wait).await.unwrap();

    assert!(run.flags.is_fake_timeout());
    assert_eq!(run.task.status, PipelineStatus::Timeout);
    assert_eq!(fx.executor.cancel_calls(), 1);
    assert_eq!(fx.store.task(27).unwrap().status, PipelineStatus::Timeout);
}

#[tokio::test]
async fn test_failed_pipeline_skips_task_without_condition() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker),
        StaticActionResolver::default(),
    );
    let task = fx.task(28, PipelineStatus::Born);
    fx.store.insert_task(task.clone());
    let request = TaskRequest::new(fx.pipeline.clone(), task, Arc::new(CancellationToken::new()))
        .with_calculated_status(PipelineStatus::Failed);

    let task = fx.reconciler().reconcile(request).await.unwrap();

    assert_eq!(task.status, PipelineStatus::NoNeedBySystem);
    assert_eq!(fx.executor.create_calls(), 0);
    assert_eq!(fx.store.update_count(), 1);
    assert_eq!(fx.store.task(28).unwrap().status, PipelineStatus::NoNeedBySystem);
}

#[tokio::test]
async fn test_failed_pipeline_runs_task_with_condition() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker)
            .with_statuses([PipelineStatus::Running, PipelineStatus::Success]),
        StaticActionResolver::default(),
    );
    let mut task = fx.task(29, PipelineStatus::Born);
    task.extra.action.if_expr = Some("pipeline_status == 'Failed'".to_string());
    fx.store.insert_task(task.clone());
    let request = TaskRequest::new(fx.pipeline.clone(), task, Arc::new(CancellationToken::new()))
        .with_calculated_status(PipelineStatus::Failed);

    let task = fx.reconciler().reconcile(request).await.unwrap();

    assert_eq!(task.status, PipelineStatus::Success);
    assert_eq!(fx.executor.create_calls(), 1);
}

#[tokio::test]
async fn test_stopped_pipeline_skips_task_with_condition() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker),
        StaticActionResolver::default(),
    );
    let mut task = fx.task(30, PipelineStatus::Born);
    task.extra.action.if_expr = Some("pipeline_status == 'Failed'".to_string());
    fx.store.insert_task(task.clone());
    let request = TaskRequest::new(fx.pipeline.clone(), task, Arc::new(CancellationToken::new()))
        .with_calculated_status(PipelineStatus::StopByUser);

    let task = fx.reconciler().reconcile(request).await.unwrap();

    assert_eq!(task.status, PipelineStatus::NoNeedBySystem);
    assert_eq!(fx.executor.create_calls(), 0);
}

#[tokio::test]
async fn test_stored_failed_pipeline_status_skips_task() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker),
        StaticActionResolver::default(),
    );
    fx.store.set_pipeline_status(PIPELINE_ID, PipelineStatus::Failed);

    let task = fx.reconcile(fx.task(31, PipelineStatus::Born)).await.unwrap();

    assert_eq!(task.status, PipelineStatus::NoNeedBySystem);
    assert_eq!(fx.executor.create_calls(), 0);
    assert_eq!(fx.store.update_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_task_token_stops_waiting() {
    let fx = Fixture::new(
        ScriptedExecutor::new(ExecutorKind::Docker).with_statuses([PipelineStatus::Running]),
        StaticActionResolver::default(),
    );
    let task = fx.task(32, PipelineStatus::Born);
    fx.store.insert_task(task.clone());
    let exit = Arc::new(CancellationToken::new());
    let cancel = Arc::new(CancellationToken::new());
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel("task cancelled by caller");
        })
    };
    let request = TaskRequest::new(fx.pipeline.clone(), task, exit.clone()).with_cancel(cancel);

    let task = fx.reconciler().reconcile(request).await.unwrap();
    canceller.await.unwrap();

    assert_eq!(task.status, PipelineStatus::Running);
    assert!(!exit.is_cancelled());
    assert_eq!(fx.executor.cancel_calls(), 0);
}
