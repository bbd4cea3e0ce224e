//! Task lifecycle events.
//!
//! Every persisted task change is announced through an [`EventSink`] so that
//! listeners (UI streams, webhooks) can react without polling the store.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::{PipelineStatus, PipelineTask};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    /// The task record was written.
    Changed,
    /// The task was reset for another loop round.
    LoopReset,
}

/// A task lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Event kind.
    pub kind: TaskEventKind,
    /// Owning pipeline.
    pub pipeline_id: u64,
    /// Task id.
    pub task_id: u64,
    /// Task name.
    pub task_name: String,
    /// Status at the time of the event.
    pub status: PipelineStatus,
    /// When the event was produced.
    pub occurred_at: DateTime<Utc>,
}

impl TaskEvent {
    /// Builds an event from the task's current state.
    #[must_use]
    pub fn new(kind: TaskEventKind, task: &PipelineTask) -> Self {
        Self {
            kind,
            pipeline_id: task.pipeline_id,
            task_id: task.id,
            task_name: task.name.clone(),
            status: task.status,
            occurred_at: Utc::now(),
        }
    }
}
