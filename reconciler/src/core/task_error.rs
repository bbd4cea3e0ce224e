//! Human-readable error history kept on a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When an error was first and last seen, and how often.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// First occurrence.
    pub start_time: DateTime<Utc>,
    /// Latest occurrence.
    pub end_time: DateTime<Utc>,
    /// Number of occurrences.
    pub count: u64,
}

/// One distinct error message on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskErrorRecord {
    /// The message shown to operators.
    pub msg: String,
    /// Occurrence bookkeeping.
    pub ctx: ErrorContext,
}

impl TaskErrorRecord {
    /// Creates a record seen once, now.
    #[must_use]
    pub fn new(msg: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            msg: msg.into(),
            ctx: ErrorContext {
                start_time: now,
                end_time: now,
                count: 1,
            },
        }
    }
}

/// Ordered, de-duplicated error history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskErrors(Vec<TaskErrorRecord>);

impl TaskErrors {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message. A repeated message bumps the existing record.
    pub fn append(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        if let Some(existing) = self.0.iter_mut().find(|r| r.msg == msg) {
            existing.ctx.count += 1;
            existing.ctx.end_time = Utc::now();
            return;
        }
        self.0.push(TaskErrorRecord::new(msg));
    }

    /// Returns the record that exceeded either limit, if any.
    #[must_use]
    pub fn exceeded(&self, max_count: u64, max_span: Duration) -> Option<&TaskErrorRecord> {
        let max_span =
            chrono::Duration::from_std(max_span).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        self.0
            .iter()
            .find(|r| r.ctx.count >= max_count || r.ctx.end_time - r.ctx.start_time >= max_span)
    }

    /// Returns the records in insertion order.
    #[must_use]
    pub fn records(&self) -> &[TaskErrorRecord] {
        &self.0
    }

    /// Returns the number of distinct messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no error was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the most recently added record.
    #[must_use]
    pub fn last(&self) -> Option<&TaskErrorRecord> {
        self.0.last()
    }
}
