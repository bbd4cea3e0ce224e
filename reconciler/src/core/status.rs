//! Pipeline and task status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status shared by pipelines and their tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PipelineStatus {
    /// Parsed and waiting to be prepared.
    #[default]
    Analyzed,
    /// Preparation failed.
    AnalyzeFailed,
    /// Prepared, not yet materialized by the executor.
    Born,
    /// Materialized by the executor.
    Created,
    /// The executor refused to materialize the task.
    CreateError,
    /// Marked for processing.
    Mark,
    /// Started, waiting in the executor's queue.
    Queue,
    /// Running in the executor.
    Running,
    /// The executor refused to start the task.
    StartError,
    /// Paused by an operator.
    Paused,
    /// Finished successfully.
    Success,
    /// Finished with a failure.
    Failed,
    /// Exceeded its timeout.
    Timeout,
    /// Stopped by a user.
    StopByUser,
    /// Skipped by the system.
    NoNeedBySystem,
    /// Failed because of a platform error.
    Error,
    /// Lost track of in the executor.
    Lost,
    /// Cancelled.
    Cancelled,
    /// Status could not be determined.
    Unknown,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Analyzed => "Analyzed",
            Self::AnalyzeFailed => "AnalyzeFailed",
            Self::Born => "Born",
            Self::Created => "Created",
            Self::CreateError => "CreateError",
            Self::Mark => "Mark",
            Self::Queue => "Queue",
            Self::Running => "Running",
            Self::StartError => "StartError",
            Self::Paused => "Paused",
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::Timeout => "Timeout",
            Self::StopByUser => "StopByUser",
            Self::NoNeedBySystem => "NoNeedBySystem",
            Self::Error => "Error",
            Self::Lost => "Lost",
            Self::Cancelled => "Cancelled",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

impl PipelineStatus {
    /// Returns true if the status is terminal.
    #[must_use]
    pub fn is_end_status(&self) -> bool {
        self.is_success_status() || self.is_failed_status()
    }

    /// Returns true if the status counts as success.
    #[must_use]
    pub fn is_success_status(&self) -> bool {
        matches!(self, Self::Success | Self::NoNeedBySystem)
    }

    /// Returns true if the status is a terminal failure.
    #[must_use]
    pub fn is_failed_status(&self) -> bool {
        matches!(
            self,
            Self::AnalyzeFailed
                | Self::CreateError
                | Self::StartError
                | Self::Failed
                | Self::Timeout
                | Self::StopByUser
                | Self::Error
                | Self::Lost
                | Self::Cancelled
                | Self::Unknown
        )
    }

    /// Returns true for failures caused by the platform rather than the task itself.
    #[must_use]
    pub fn is_abnormal_failed_status(&self) -> bool {
        matches!(
            self,
            Self::AnalyzeFailed
                | Self::CreateError
                | Self::StartError
                | Self::Error
                | Self::Lost
                | Self::Unknown
        )
    }

    /// Returns true while the reconciler still has phases to drive.
    #[must_use]
    pub fn is_reconciler_running_status(&self) -> bool {
        matches!(
            self,
            Self::Analyzed | Self::Born | Self::Created | Self::Mark | Self::Queue | Self::Running
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(PipelineStatus::Success.to_string(), "Success");
        assert_eq!(PipelineStatus::NoNeedBySystem.to_string(), "NoNeedBySystem");
    }

    #[test]
    fn test_end_statuses() {
        assert!(PipelineStatus::Success.is_end_status());
        assert!(PipelineStatus::Timeout.is_end_status());
        assert!(PipelineStatus::StartError.is_end_status());
        assert!(!PipelineStatus::Running.is_end_status());
        assert!(!PipelineStatus::Analyzed.is_end_status());
        assert!(!PipelineStatus::Paused.is_end_status());
    }

    #[test]
    fn test_abnormal_failed() {
        assert!(PipelineStatus::CreateError.is_abnormal_failed_status());
        assert!(!PipelineStatus::Failed.is_abnormal_failed_status());
        assert!(!PipelineStatus::Success.is_abnormal_failed_status());
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&PipelineStatus::Queue).unwrap();
        assert_eq!(json, r#""Queue""#);
        let back: PipelineStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PipelineStatus::Queue);
    }
}
