//! Repeating tasks.
//!
//! After a phase leaves a looping task terminal, the task is either left
//! alone (break expression true, max rounds reached, pipeline ended) or reset
//! to `Analyzed` after a backoff pause so the driver runs it again.

use super::TaskRun;
use crate::backoff::Backoff;
use crate::core::{LoopOptions, PipelineStatus, PipelineTask, TaskContext, TaskResult};
use crate::events::{TaskEvent, TaskEventKind};
use crate::expression::OUTPUTS_PREFIX;
use crate::ports::{Report, ReportKind};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Variables visible to loop break expressions.
#[must_use]
pub fn loop_vars(task: &PipelineTask, pipeline_status: PipelineStatus) -> HashMap<String, String> {
    let looped_times = task
        .extra
        .loop_options
        .as_ref()
        .map_or(0, |opts| opts.looped_times);
    let mut vars = HashMap::from([
        ("task_status".to_string(), task.status.to_string()),
        ("pipeline_status".to_string(), pipeline_status.to_string()),
        ("looped_times".to_string(), looped_times.to_string()),
    ]);
    for field in &task.result.metadata {
        vars.insert(format!("{OUTPUTS_PREFIX}{}", field.name), field.value.clone());
    }
    vars
}

/// Pause before the next round, seeded by the rounds already repeated.
#[must_use]
pub(crate) fn loop_interval(options: &LoopOptions) -> Duration {
    let strategy = options.strategy();
    Backoff::new()
        .with_interval(Duration::from_secs(strategy.interval_sec))
        .with_decline_ratio(strategy.decline_ratio)
        .with_decline_limit(Duration::from_secs(strategy.decline_limit_sec))
        .calculate_interval(options.looped_times.saturating_sub(1))
}

impl TaskRun {
    /// Resets a terminal looping task for another round when eligible.
    pub(crate) async fn handle_task_loop(&mut self) {
        if !self.task.status.is_end_status() {
            return;
        }
        let Some(options) = self.task.extra.loop_options.clone() else {
            return;
        };

        let pipeline_status = match self.pipeline_status().await {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, "cannot read pipeline status, task stays terminal");
                return;
            }
        };
        if pipeline_status.is_end_status() {
            return;
        }

        let vars = loop_vars(&self.task, pipeline_status);
        let break_expr = &options.calculated_loop.break_expr;
        match self.ports.evaluator.evaluate(break_expr, &vars) {
            Ok(true) => {
                debug!(%break_expr, "loop break condition met");
                return;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(%break_expr, error = %err, "invalid loop break expression, task stays terminal");
                return;
            }
        }
        let max_times = options.strategy().max_times;
        if options.looped_times >= max_times {
            info!(looped_times = options.looped_times, max_times, "loop reached max times");
            return;
        }

        self.report_loop_round(&options).await;

        let interval = loop_interval(&options);
        info!(
            looped_times = options.looped_times,
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "task will loop"
        );
        let pipeline_exit = std::sync::Arc::clone(&self.pipeline_exit);
        tokio::select! {
            () = pipeline_exit.cancelled() => {
                info!("pipeline exited during loop pause");
                return;
            }
            () = tokio::time::sleep(interval) => {}
        }

        match self.pipeline_status().await {
            Ok(status) if !status.is_end_status() => {}
            Ok(status) => {
                info!(pipeline_status = %status, "pipeline ended during loop pause");
                return;
            }
            Err(err) => {
                warn!(error = %err, "cannot re-read pipeline status, task stays terminal");
                return;
            }
        }

        self.reset_for_loop(options);
        self.ports
            .events
            .emit(TaskEvent::new(TaskEventKind::LoopReset, &self.task))
            .await;
    }

    async fn report_loop_round(&self, options: &LoopOptions) {
        let errors: Vec<&str> = self
            .task
            .result
            .errors
            .records()
            .iter()
            .map(|e| e.msg.as_str())
            .collect();
        let report = Report::new(ReportKind::TaskLoopRound, self.task.pipeline_id)
            .with_task(self.task.id)
            .with_meta(json!({
                "looped_times": options.looped_times,
                "status": self.task.status.to_string(),
                "time_begin": self.task.time_begin,
                "time_end": self.task.time_end,
                "cost_time_sec": self.task.cost_time_sec,
                "errors": errors,
                "metadata": self.task.result.metadata,
            }));
        if let Err(err) = self.ports.report.create(report).await {
            warn!(error = %err, "failed to report loop round");
        }
    }

    fn reset_for_loop(&mut self, mut options: LoopOptions) {
        options.looped_times += 1;
        let task = &mut self.task;
        task.status = PipelineStatus::Analyzed;
        task.time_begin = None;
        task.time_end = None;
        task.queue_time_sec = 0;
        task.cost_time_sec = 0;
        task.extra.time_begin_queue = None;
        task.extra.time_end_queue = None;
        task.extra.volumes.clear();
        task.extra.loop_options = Some(options);
        task.result = TaskResult::default();
        task.context = TaskContext::default();
        self.flags.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{LoopStrategy, MetadataField, TaskLoop};

    fn options(looped_times: u64) -> LoopOptions {
        let mut opts = LoopOptions::resolve(
            None,
            Some(TaskLoop {
                break_expr: String::new(),
                strategy: Some(LoopStrategy {
                    max_times: 5,
                    decline_ratio: 2.0,
                    decline_limit_sec: 10,
                    interval_sec: 2,
                }),
            }),
        )
        .unwrap();
        opts.looped_times = looped_times;
        opts
    }

    #[test]
    fn test_loop_interval_grows_with_rounds() {
        assert_eq!(loop_interval(&options(1)), Duration::from_secs(2));
        assert_eq!(loop_interval(&options(2)), Duration::from_secs(4));
        assert_eq!(loop_interval(&options(3)), Duration::from_secs(8));
        assert_eq!(loop_interval(&options(4)), Duration::from_secs(10));
    }

    #[test]
    fn test_loop_vars() {
        let mut task = PipelineTask::new(1, 2, "probe").with_status(PipelineStatus::Failed);
        task.extra.loop_options = Some(options(3));
        task.result.metadata.push(MetadataField {
            name: "code".to_string(),
            value: "503".to_string(),
        });

        let vars = loop_vars(&task, PipelineStatus::Running);
        assert_eq!(vars["task_status"], "Failed");
        assert_eq!(vars["pipeline_status"], "Running");
        assert_eq!(vars["looped_times"], "3");
        assert_eq!(vars["outputs.code"], "503");
    }
}
