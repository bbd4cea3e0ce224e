//! Releasing what a finished task held.

use super::TaskRun;
use crate::aop::TuneTrigger;
use tracing::{debug, warn};

impl TaskRun {
    /// Runs once the driver is done with the task, whatever the outcome.
    ///
    /// Reloads the persisted task, releases its throttler slot and fires the
    /// `after-exec` hooks.
    pub async fn teardown(&mut self) {
        match self.latest_task().await {
            Ok(latest) => self.task = latest,
            Err(err) => warn!(task_id = self.task.id, error = %err, "cannot reload task for teardown"),
        }

        let key = self.task.throttle_key();
        let released = self.ports.throttler.pop_processing(&key);
        debug!(
            task_id = self.task.id,
            %key,
            released = released.admitted,
            detail = %released.detail,
            "released throttler slot"
        );

        self.fire_hook(TuneTrigger::AfterExec).await;
    }
}
