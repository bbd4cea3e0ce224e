//! Core data model: pipelines, tasks, statuses and the bags tasks carry.

mod loop_options;
mod pipeline;
mod status;
mod task;
mod task_error;

pub use loop_options::{LoopOptions, LoopStrategy, TaskLoop, DEFAULT_LOOP_BREAK, LOOP_TIME_BEGIN};
pub use pipeline::{Pipeline, PipelineSnapshot};
pub use status::PipelineStatus;
pub use task::{
    ActionSpec, ExecutorKind, MetadataField, PipelineTask, QueueConfig, RuntimeResource,
    StorageRef, TaskContext, TaskExtra, TaskResult, TaskTimeout,
};
pub use task_error::{ErrorContext, TaskErrorRecord, TaskErrors};
