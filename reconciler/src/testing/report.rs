//! Recording report service.

use crate::errors::Result;
use crate::ports::{Report, ReportKind, ReportService};
use async_trait::async_trait;
use parking_lot::Mutex;

/// A [`ReportService`] that keeps every report in memory.
#[derive(Debug, Default)]
pub struct RecordingReportService {
    reports: Mutex<Vec<Report>>,
}

impl RecordingReportService {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All reports so far.
    #[must_use]
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    /// Reports of one kind.
    #[must_use]
    pub fn reports_of_kind(&self, kind: ReportKind) -> Vec<Report> {
        self.reports
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ReportService for RecordingReportService {
    async fn create(&self, report: Report) -> Result<()> {
        self.reports.lock().push(report);
        Ok(())
    }
}
