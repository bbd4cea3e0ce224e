//! Event sink trait and implementations.

use super::{TaskEvent, TaskEventKind};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

/// Receives task lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: TaskEvent);

    /// Emits an event without blocking.
    ///
    /// Must never fail; problems are logged and suppressed.
    fn try_emit(&self, event: TaskEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: TaskEvent) {}

    fn try_emit(&self, _event: TaskEvent) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    fn log_event(&self, event: &TaskEvent) {
        if self.level == Level::DEBUG || self.level == Level::TRACE {
            debug!(
                kind = ?event.kind,
                pipeline_id = event.pipeline_id,
                task_id = event.task_id,
                task_name = %event.task_name,
                status = %event.status,
                "task event"
            );
        } else {
            info!(
                kind = ?event.kind,
                pipeline_id = event.pipeline_id,
                task_id = event.task_id,
                task_name = %event.task_name,
                status = %event.status,
                "task event"
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: TaskEvent) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: TaskEvent) {
        self.log_event(&event);
    }
}

/// Collects events in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<TaskEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns the events of one kind.
    #[must_use]
    pub fn events_of_kind(&self, kind: TaskEventKind) -> Vec<TaskEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: TaskEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: TaskEvent) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PipelineStatus, PipelineTask};

    fn event(kind: TaskEventKind) -> TaskEvent {
        let task = PipelineTask::new(1, 2, "build").with_status(PipelineStatus::Running);
        TaskEvent::new(kind, &task)
    }

    #[tokio::test]
    async fn test_noop_and_logging_sinks() {
        NoOpEventSink.emit(event(TaskEventKind::Changed)).await;
        LoggingEventSink::new(Level::DEBUG).try_emit(event(TaskEventKind::Changed));
        LoggingEventSink::default().emit(event(TaskEventKind::LoopReset)).await;
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(event(TaskEventKind::Changed)).await;
        sink.try_emit(event(TaskEventKind::LoopReset));

        assert_eq!(sink.len(), 2);
        let resets = sink.events_of_kind(TaskEventKind::LoopReset);
        assert_eq!(resets.len(), 1);
        assert_eq!(resets[0].task_name, "build");
        assert_eq!(resets[0].status, PipelineStatus::Running);
    }
}
