//! Prepare: resolve the action and fill in everything the executor needs.
//!
//! The slow part (action resolution, reading sibling tasks) runs on the
//! worker. Filling the task happens in `when_done`:
//!
//! - executor kind, cluster and loop options;
//! - the executor-side uuid (`pipeline-task-{id}`, suffixed per loop round);
//! - image, resources, volumes, binds and admission queues;
//! - public and private environment;
//! - input storages from earlier stages and output storages per namespace;
//! - the agent command with its base64 bootstrap argument;
//! - the `if` condition, which may skip or fail the task.
//!
//! A transient resolution failure is a platform error, so the task keeps its
//! `Analyzed` status and is simply prepared again.

use super::fail_phase;
use crate::aop::TuneTrigger;
use crate::backoff::Step;
use crate::core::{
    LoopOptions, Pipeline, PipelineStatus, PipelineTask, StorageRef, TaskContext, LOOP_TIME_BEGIN,
};
use crate::errors::{ReconcileError, Result};
use crate::ports::{Resolution, ResolvedAction};
use crate::taskrun::{loop_vars, Op, PhaseContext, TaskOp, TaskRun, TuneTriggers};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Entrypoint of the in-container agent.
pub const AGENT_CMD: &str = "/opt/action/agent";

/// Label carrying the stage order of a storage reference.
const STAGE_ORDER_LABEL: &str = "stageOrder";

/// Data gathered by the prepare worker.
#[derive(Debug, Clone)]
pub struct PrepareOutput {
    /// The resolved action.
    pub resolved: ResolvedAction,
    /// Every task of the pipeline, for input storages and `if` variables.
    pub siblings: Vec<PipelineTask>,
}

/// `Analyzed → Born`, or `NoNeedBySystem` when the `if` condition is false.
#[derive(Debug, Clone, Copy, Default)]
pub struct Prepare;

#[derive(Serialize)]
struct AgentArg<'a> {
    pipeline_id: u64,
    task_id: u64,
    task_name: &'a str,
    uuid: &'a str,
    commands: Vec<String>,
    in_storages: &'a [StorageRef],
    out_storages: &'a [StorageRef],
    private_env_keys: Vec<&'a str>,
}

/// Executor-side name of the task for its current loop round.
#[must_use]
pub fn make_uuid(task: &PipelineTask) -> String {
    let base = format!("pipeline-task-{}", task.id);
    match task.extra.loop_options.as_ref().map(|o| o.looped_times) {
        Some(round) if round > LOOP_TIME_BEGIN => format!("{base}-loop-{round}"),
        _ => base,
    }
}

fn env_key(prefix: &str, name: &str) -> String {
    let mut key = String::with_capacity(prefix.len() + name.len());
    key.push_str(prefix);
    for c in name.chars() {
        key.push(if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' });
    }
    key
}

fn param_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn public_envs(pipeline: &Pipeline, task: &PipelineTask, resolved: &ResolvedAction) -> HashMap<String, String> {
    let mut envs = pipeline.snapshot.envs.clone();
    envs.extend(resolved.envs.clone());
    for (name, value) in &task.extra.action.params {
        envs.insert(env_key("ACTION_", name), param_value(value));
    }
    let resource = &task.extra.runtime_resource;
    envs.extend([
        ("PIPELINE_ID".to_string(), pipeline.id.to_string()),
        ("PIPELINE_TASK_ID".to_string(), task.id.to_string()),
        ("PIPELINE_TASK_NAME".to_string(), task.name.clone()),
        ("PIPELINE_TASK_UUID".to_string(), task.extra.uuid.clone()),
        ("PIPELINE_LIMITED_CPU".to_string(), resource.max_cpu.to_string()),
        ("PIPELINE_LIMITED_MEM".to_string(), resource.max_memory.to_string()),
    ]);
    if let Some(opts) = &task.extra.loop_options {
        envs.insert("PIPELINE_TASK_LOOPED_TIMES".to_string(), opts.looped_times.to_string());
    }
    envs
}

fn private_envs(pipeline: &Pipeline) -> HashMap<String, String> {
    pipeline
        .all_secrets()
        .into_iter()
        .map(|(name, value)| (env_key("PIPELINE_SECRET_", &name), value))
        .collect()
}

fn storages(task: &PipelineTask, siblings: &[PipelineTask]) -> TaskContext {
    let stage_order = task.extra.stage_order;
    let mut context = TaskContext::default();
    for sibling in siblings
        .iter()
        .filter(|s| s.id != task.id && s.extra.stage_order < stage_order)
    {
        for out in &sibling.context.out_storages {
            let mut input = out.clone();
            input
                .labels
                .insert(STAGE_ORDER_LABEL.to_string(), sibling.extra.stage_order.to_string());
            context.in_storages.push(input);
        }
    }
    for namespace in &task.extra.action.namespaces {
        context.out_storages.push(StorageRef {
            name: namespace.clone(),
            value: format!("pipeline-{}/task-{}/{namespace}", task.pipeline_id, task.id),
            labels: HashMap::from([(STAGE_ORDER_LABEL.to_string(), stage_order.to_string())]),
        });
    }
    context.dedup();
    context
}

fn condition_vars(task: &PipelineTask, pipeline: &Pipeline, siblings: &[PipelineTask]) -> HashMap<String, String> {
    let mut vars = loop_vars(task, pipeline.status);
    for sibling in siblings.iter().filter(|s| s.id != task.id) {
        for field in &sibling.result.metadata {
            vars.insert(format!("outputs.{}.{}", sibling.name, field.name), field.value.clone());
        }
    }
    vars
}

fn agent_args(task: &PipelineTask) -> Result<Vec<String>> {
    let mut private_env_keys: Vec<&str> = task.extra.private_envs.keys().map(String::as_str).collect();
    private_env_keys.sort_unstable();
    let arg = AgentArg {
        pipeline_id: task.pipeline_id,
        task_id: task.id,
        task_name: &task.name,
        uuid: &task.extra.uuid,
        commands: task
            .extra
            .action
            .params
            .get("commands")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default(),
        in_storages: &task.context.in_storages,
        out_storages: &task.context.out_storages,
        private_env_keys,
    };
    Ok(vec![STANDARD.encode(serde_json::to_vec(&arg)?)])
}

impl Prepare {
    fn fill(run: &mut TaskRun, output: &PrepareOutput) -> Result<()> {
        let pipeline = std::sync::Arc::clone(&run.pipeline);
        let resolved = &output.resolved;
        let task = &mut run.task;

        task.executor_kind = resolved.executor_kind;
        if task.extra.cluster_name.is_none() {
            task.extra.cluster_name = Some(pipeline.cluster_name.clone());
        }
        if task.extra.loop_options.is_none() {
            task.extra.loop_options =
                LoopOptions::resolve(resolved.spec_loop.clone(), task.extra.action.task_loop.clone());
        }
        task.extra.uuid = make_uuid(task);

        let image = task
            .extra
            .action
            .image
            .clone()
            .filter(|image| !image.trim().is_empty())
            .unwrap_or_else(|| resolved.image.clone());
        if image.trim().is_empty() {
            return Err(ReconcileError::user(format!(
                "no image resolved for action {}@{}",
                task.action_type, task.action_version
            )));
        }
        task.extra.image = image;

        task.extra.runtime_resource = resolved.resource;
        task.extra.volumes.clone_from(&resolved.volumes);
        task.extra.binds.clone_from(&resolved.binds);
        task.extra.queue_configs.clone_from(&resolved.queue_configs);

        let mut labels = pipeline.labels.clone();
        labels.extend(resolved.labels.clone());
        task.extra.labels = labels;

        task.extra.public_envs = public_envs(&pipeline, task, resolved);
        task.extra.private_envs = private_envs(&pipeline);

        task.context = storages(task, &output.siblings);

        task.extra.cmd = resolved.cmd.clone().unwrap_or_else(|| AGENT_CMD.to_string());
        task.extra.cmd_args = agent_args(task)?;
        Ok(())
    }

    async fn persist_sub_documents(run: &TaskRun) -> Result<()> {
        let store = &run.ports.store;
        let task = &run.task;
        run.config
            .update_backoff()
            .run(|| async move {
                store.update_task_context(task.id, &task.context).await?;
                store.update_task_extra(task.id, &task.extra).await?;
                Ok(Step::Done(()))
            })
            .await
    }
}

#[async_trait]
impl TaskOp for Prepare {
    type Output = PrepareOutput;

    fn op(&self) -> Op {
        Op::Prepare
    }

    async fn processing(&self, ctx: PhaseContext) -> Result<PrepareOutput> {
        let resolved = match ctx.ports.resolver.resolve(&ctx.pipeline, &ctx.task).await? {
            Resolution::Ready(resolved) => resolved,
            Resolution::NeedRetry(reason) => {
                return Err(ReconcileError::platform(format!("prepare need retry: {reason}")));
            }
        };
        let siblings = ctx.ports.store.list_tasks(ctx.pipeline.id).await?;
        Ok(PrepareOutput { resolved, siblings })
    }

    async fn when_done(&self, run: &mut TaskRun, output: PrepareOutput) -> Result<()> {
        if let Err(err) = Self::fill(run, &output) {
            return fail_phase(run, PipelineStatus::AnalyzeFailed, err);
        }
        Self::persist_sub_documents(run).await?;

        let if_expr = run
            .task
            .extra
            .action
            .if_expr
            .clone()
            .filter(|expr| !expr.trim().is_empty());
        if let Some(expr) = if_expr {
            let vars = condition_vars(&run.task, &run.pipeline, &output.siblings);
            match run.ports.evaluator.evaluate(&expr, &vars) {
                Ok(true) => debug!(%expr, "if condition met"),
                Ok(false) => {
                    info!(%expr, "if condition not met, task skipped");
                    run.task.status = PipelineStatus::NoNeedBySystem;
                    return Ok(());
                }
                Err(err) => {
                    run.task.status = PipelineStatus::Failed;
                    run.task.result.errors.append(err.to_string());
                    return Err(err);
                }
            }
        }

        run.task.status = PipelineStatus::Born;
        Ok(())
    }

    async fn when_logic_error(&self, run: &mut TaskRun, err: ReconcileError) -> Result<()> {
        fail_phase(run, PipelineStatus::AnalyzeFailed, err)
    }

    fn tune_triggers(&self) -> TuneTriggers {
        TuneTriggers {
            before: TuneTrigger::BeforePrepare,
            after: TuneTrigger::AfterPrepare,
        }
    }
}
