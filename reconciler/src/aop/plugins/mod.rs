//! Built-in tune points.

mod task_report;

pub use task_report::{TaskReport, TASK_REPORT};
