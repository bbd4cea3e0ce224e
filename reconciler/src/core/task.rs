//! Pipeline task record and the bags it carries.

use super::{LoopOptions, PipelineStatus, TaskErrors};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Backend kind that runs a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Kubernetes job.
    #[default]
    K8sJob,
    /// Kubernetes spark application.
    K8sSpark,
    /// Kubernetes flink deployment.
    K8sFlink,
    /// Local docker daemon.
    Docker,
    /// In-process wait/sleep action.
    Wait,
    /// In-process API test action.
    ApiTest,
}

impl ExecutorKind {
    /// Returns true for Kubernetes-backed executors.
    #[must_use]
    pub fn is_k8s_kind(&self) -> bool {
        matches!(self, Self::K8sJob | Self::K8sSpark | Self::K8sFlink)
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::K8sJob => write!(f, "k8sjob"),
            Self::K8sSpark => write!(f, "k8sspark"),
            Self::K8sFlink => write!(f, "k8sflink"),
            Self::Docker => write!(f, "docker"),
            Self::Wait => write!(f, "wait"),
            Self::ApiTest => write!(f, "api-test"),
        }
    }
}

/// How long a task may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TaskTimeout {
    /// Use the platform default.
    #[default]
    Default,
    /// Never time out.
    Never,
    /// Time out after the given duration of actual runtime.
    After(Duration),
}

impl TaskTimeout {
    /// Resolves to a concrete duration, or `None` when the task never times out.
    #[must_use]
    pub fn resolve(&self, platform_default: Duration) -> Option<Duration> {
        match self {
            Self::Default => Some(platform_default),
            Self::Never => None,
            Self::After(d) if d.is_zero() => Some(platform_default),
            Self::After(d) => Some(*d),
        }
    }
}

/// CPU, memory and disk requested and allowed for a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeResource {
    /// Requested CPU cores.
    pub cpu: f64,
    /// Requested memory in MiB.
    pub memory: f64,
    /// CPU limit.
    pub max_cpu: f64,
    /// Memory limit in MiB.
    pub max_memory: f64,
    /// Disk in MiB.
    pub disk: f64,
}

/// Admission queue a task belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name.
    pub name: String,
    /// How many tasks of the queue may be processing at once.
    pub window: usize,
    /// Higher pops first.
    pub priority: i64,
}

/// A named storage reference (volume, cache, output namespace).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRef {
    /// Storage name.
    pub name: String,
    /// Location or id.
    pub value: String,
    /// Extra labels such as `stageOrder`.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Cached fields of the task's action definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Action type, e.g. `git-checkout`.
    pub action_type: String,
    /// Action version.
    pub version: String,
    /// Image override declared on the action.
    pub image: Option<String>,
    /// Action parameters.
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    /// Run condition.
    pub if_expr: Option<String>,
    /// Output namespaces the action produces.
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Loop declared on the task itself.
    pub task_loop: Option<super::TaskLoop>,
}

/// Structured "Extra" bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskExtra {
    /// Executor-side unique name.
    pub uuid: String,
    /// Runtime limit.
    #[serde(default)]
    pub timeout: TaskTimeout,
    /// Repeat options, set once during the first prepare.
    pub loop_options: Option<LoopOptions>,
    /// Cluster override; falls back to the pipeline's cluster.
    pub cluster_name: Option<String>,
    /// Stage the task belongs to.
    #[serde(default)]
    pub stage_order: usize,
    /// Cached action definition.
    #[serde(default)]
    pub action: ActionSpec,
    /// Container image.
    pub image: String,
    /// Container command.
    pub cmd: String,
    /// Container arguments.
    #[serde(default)]
    pub cmd_args: Vec<String>,
    /// Environment visible to operators.
    #[serde(default)]
    pub public_envs: HashMap<String, String>,
    /// Environment hidden from operators.
    #[serde(default)]
    pub private_envs: HashMap<String, String>,
    /// Scheduling labels.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Resource requests and limits.
    #[serde(default)]
    pub runtime_resource: RuntimeResource,
    /// Mounted volumes.
    #[serde(default)]
    pub volumes: Vec<StorageRef>,
    /// Host binds.
    #[serde(default)]
    pub binds: Vec<String>,
    /// Admission queues.
    #[serde(default)]
    pub queue_configs: Vec<QueueConfig>,
    /// When the task entered the executor's queue.
    pub time_begin_queue: Option<DateTime<Utc>>,
    /// When the task left the executor's queue.
    pub time_end_queue: Option<DateTime<Utc>>,
}

/// One metadata key/value produced by execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    /// Key.
    pub name: String,
    /// Value.
    pub value: String,
}

/// Structured "Result" bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Error history.
    #[serde(default)]
    pub errors: TaskErrors,
    /// Values produced by execution.
    #[serde(default)]
    pub metadata: Vec<MetadataField>,
    /// Executor diagnostics captured after a failure.
    pub inspect: Option<String>,
    /// Last status message the executor reported.
    pub status_desc: Option<String>,
}

impl TaskResult {
    /// Looks up a metadata value.
    #[must_use]
    pub fn metadata_value(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.value.as_str())
    }
}

/// Structured "Context" bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Storages produced by earlier tasks and mounted as inputs.
    #[serde(default)]
    pub in_storages: Vec<StorageRef>,
    /// Storages this task produces.
    #[serde(default)]
    pub out_storages: Vec<StorageRef>,
}

impl TaskContext {
    /// Removes duplicate storages by name, keeping the first.
    pub fn dedup(&mut self) {
        fn dedup_by_name(list: &mut Vec<StorageRef>) {
            let mut seen = std::collections::HashSet::new();
            list.retain(|s| seen.insert(s.name.clone()));
        }
        dedup_by_name(&mut self.in_storages);
        dedup_by_name(&mut self.out_storages);
    }

    /// Returns true when both lists are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.in_storages.is_empty() && self.out_storages.is_empty()
    }
}

/// One step of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineTask {
    /// Task id.
    pub id: u64,
    /// Owning pipeline.
    pub pipeline_id: u64,
    /// Task name (action alias).
    pub name: String,
    /// Declared action type.
    pub action_type: String,
    /// Declared action version.
    pub action_version: String,
    /// Current status.
    pub status: PipelineStatus,
    /// Backend kind.
    #[serde(default)]
    pub executor_kind: ExecutorKind,
    /// Extra bag.
    #[serde(default)]
    pub extra: TaskExtra,
    /// Result bag.
    #[serde(default)]
    pub result: TaskResult,
    /// Context bag.
    #[serde(default)]
    pub context: TaskContext,
    /// Actual run start.
    pub time_begin: Option<DateTime<Utc>>,
    /// Run end.
    pub time_end: Option<DateTime<Utc>>,
    /// Seconds spent queued in the executor.
    #[serde(default)]
    pub queue_time_sec: i64,
    /// Seconds spent running.
    #[serde(default)]
    pub cost_time_sec: i64,
}

impl PipelineTask {
    /// Creates an analyzed task.
    #[must_use]
    pub fn new(id: u64, pipeline_id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            pipeline_id,
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the action type and version.
    #[must_use]
    pub fn with_action(mut self, action_type: impl Into<String>, version: impl Into<String>) -> Self {
        self.action_type = action_type.into();
        self.action_version = version.into();
        self.extra.action.action_type.clone_from(&self.action_type);
        self.extra.action.version.clone_from(&self.action_version);
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: PipelineStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: TaskTimeout) -> Self {
        self.extra.timeout = timeout;
        self
    }

    /// Sets the executor kind.
    #[must_use]
    pub fn with_executor_kind(mut self, kind: ExecutorKind) -> Self {
        self.executor_kind = kind;
        self
    }

    /// Key identifying this task in the throttler.
    #[must_use]
    pub fn throttle_key(&self) -> String {
        format!("pipeline-{}/task-{}", self.pipeline_id, self.id)
    }
}
