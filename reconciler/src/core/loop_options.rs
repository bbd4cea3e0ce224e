//! Repeat ("loop") options of a task.

use serde::{Deserialize, Serialize};

/// Break expression used when none is declared.
pub const DEFAULT_LOOP_BREAK: &str = "task_status == 'Success'";

/// The first run of a task counts as loop round 1.
pub const LOOP_TIME_BEGIN: u64 = 1;

/// Interval and ceiling settings of a repeating task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopStrategy {
    /// Maximum number of rounds.
    pub max_times: u64,
    /// Multiplier applied per repeat.
    pub decline_ratio: f64,
    /// Cap of the computed interval, in seconds.
    pub decline_limit_sec: u64,
    /// Base interval, in seconds.
    pub interval_sec: u64,
}

impl Default for LoopStrategy {
    fn default() -> Self {
        Self {
            max_times: 10,
            decline_ratio: 1.5,
            decline_limit_sec: 60,
            interval_sec: 5,
        }
    }
}

/// A loop declaration: when to stop, and how to pace the rounds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskLoop {
    /// Expression that ends the loop when true.
    #[serde(rename = "break", default)]
    pub break_expr: String,
    /// Pacing.
    pub strategy: Option<LoopStrategy>,
}

/// Loop state persisted on the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopOptions {
    /// Loop declared on the task.
    pub task_loop: Option<TaskLoop>,
    /// Loop declared by the action's spec.
    pub spec_loop: Option<TaskLoop>,
    /// Effective loop after defaults.
    pub calculated_loop: TaskLoop,
    /// Rounds run so far, including the current one.
    pub looped_times: u64,
}

impl LoopOptions {
    /// Builds loop options from the action spec's loop and the task's own loop.
    ///
    /// The task's loop wins. Returns `None` when neither declares one.
    #[must_use]
    pub fn resolve(spec_loop: Option<TaskLoop>, task_loop: Option<TaskLoop>) -> Option<Self> {
        let mut calculated = task_loop.clone().or_else(|| spec_loop.clone())?;

        if calculated.break_expr.trim().is_empty() {
            calculated.break_expr = DEFAULT_LOOP_BREAK.to_string();
        }

        let defaults = LoopStrategy::default();
        let mut strategy = calculated.strategy.unwrap_or(defaults);
        let interval_declared = strategy.interval_sec != 0;
        if !interval_declared {
            strategy.interval_sec = defaults.interval_sec;
        }
        if strategy.decline_ratio <= 0.0 {
            strategy.decline_ratio = if interval_declared { 1.0 } else { defaults.decline_ratio };
        }
        if strategy.decline_limit_sec == 0 {
            strategy.decline_limit_sec = if interval_declared {
                strategy.interval_sec
            } else {
                defaults.decline_limit_sec
            };
        }
        if strategy.max_times == 0 {
            strategy.max_times = defaults.max_times;
        }
        calculated.strategy = Some(strategy);

        Some(Self {
            task_loop,
            spec_loop,
            calculated_loop: calculated,
            looped_times: LOOP_TIME_BEGIN,
        })
    }

    /// Returns the effective strategy.
    #[must_use]
    pub fn strategy(&self) -> LoopStrategy {
        self.calculated_loop.strategy.unwrap_or_default()
    }
}
