//! Report service port.

use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a report describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportKind {
    /// Final outcome of a task.
    TaskResult,
    /// Snapshot of one finished round of a repeating task.
    TaskLoopRound,
}

/// A report record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Report id.
    pub id: Uuid,
    /// Pipeline the report belongs to.
    pub pipeline_id: u64,
    /// Task the report belongs to, if any.
    pub task_id: Option<u64>,
    /// Report kind.
    pub kind: ReportKind,
    /// Free-form payload.
    pub meta: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Report {
    /// Creates an empty report of the given kind.
    #[must_use]
    pub fn new(kind: ReportKind, pipeline_id: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id,
            task_id: None,
            kind,
            meta: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Sets the task id.
    #[must_use]
    pub fn with_task(mut self, task_id: u64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }
}

/// Stores reports. Best-effort from the reconciler's point of view.
#[async_trait]
pub trait ReportService: Send + Sync {
    /// Persists a report.
    async fn create(&self, report: Report) -> Result<()>;
}

/// Drops every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReportService;

#[async_trait]
impl ReportService for NoOpReportService {
    async fn create(&self, _report: Report) -> Result<()> {
        Ok(())
    }
}
