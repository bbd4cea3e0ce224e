//! The five phases.

mod create;
mod prepare;
mod queue;
mod start;
mod wait;

pub use create::Create;
pub use prepare::{Prepare, PrepareOutput, AGENT_CMD};
pub use queue::Queue;
pub use start::Start;
pub use wait::{Wait, WaitOutput};

use super::TaskRun;
use crate::core::PipelineStatus;
use crate::errors::{ReconcileError, Result};

/// Moves the task to a phase error status, records the message and hands the error back.
pub(crate) fn fail_phase(run: &mut TaskRun, status: PipelineStatus, err: ReconcileError) -> Result<()> {
    run.task.status = status;
    run.task.result.errors.append(err.to_string());
    Err(err)
}
