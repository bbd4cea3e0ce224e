//! Action resolution port used by the prepare phase.

use crate::core::{
    ExecutorKind, Pipeline, PipelineTask, QueueConfig, RuntimeResource, StorageRef, TaskLoop,
};
use crate::errors::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Everything prepare needs to know about a task's action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedAction {
    /// Image declared by the action spec.
    pub image: String,
    /// Command override; the agent entrypoint is used when absent.
    pub cmd: Option<String>,
    /// Loop declared by the action spec.
    pub spec_loop: Option<TaskLoop>,
    /// Extra environment contributed by the action spec.
    pub envs: HashMap<String, String>,
    /// Scheduling labels contributed by the action spec.
    pub labels: HashMap<String, String>,
    /// Resource requests and limits.
    pub resource: RuntimeResource,
    /// Cache and volume bindings.
    pub volumes: Vec<StorageRef>,
    /// Host binds.
    pub binds: Vec<String>,
    /// Admission queues the task joins.
    pub queue_configs: Vec<QueueConfig>,
    /// Backend that runs the action.
    pub executor_kind: ExecutorKind,
}

/// Outcome of resolving an action.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The action is fully resolved.
    Ready(ResolvedAction),
    /// A dependency is temporarily unavailable; try again later.
    NeedRetry(String),
}

/// Resolves a task's action definition, image and bindings.
///
/// Configuration mistakes are returned as user errors; a registry hiccup is
/// reported as [`Resolution::NeedRetry`].
#[async_trait]
pub trait ActionResolver: Send + Sync {
    /// Resolves the action of `task`.
    async fn resolve(&self, pipeline: &Pipeline, task: &PipelineTask) -> Result<Resolution>;
}
