//! # Pipeline Reconciler
//!
//! Drives the tasks of a pipeline through their lifecycle on an external
//! executor.
//!
//! A task moves `Analyzed → Born → Created → Queue → Running → <end status>`.
//! Each transition is a phase (Prepare, Create, Start, Queue, Wait) run by a
//! [`taskrun::TaskRun`] harness that supports:
//!
//! - **Cancellation and timeouts**: a phase races its worker against the task
//!   deadline, a per-task token and the pipeline exit signal
//! - **Error classification**: platform errors roll the task back for a retry,
//!   user errors fail it
//! - **Tune points**: named hooks fired before and after each phase
//! - **Repeating tasks**: a break expression decides whether a finished task
//!   runs another round
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipeline_reconciler::prelude::*;
//!
//! let ports = ReconcilerPorts::new(store, throttler, resolver);
//! let executors = Arc::new(ExecutorRegistry::new().with_executor(k8s_job));
//! let reconciler = TaskReconciler::new(ports, executors, Arc::new(ReconcilerConfig::default()));
//!
//! let task = reconciler
//!     .reconcile_one_task_until_done(pipeline, task, pipeline_exit)
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod aop;
pub mod backoff;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod expression;
pub mod observability;
pub mod ports;
pub mod reconciler;
pub mod taskrun;
pub mod testing;

#[cfg(test)]
mod integration_tests;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aop::{
        TuneConfig, TuneContext, TuneEngine, TuneEngineBuilder, TunePoint, TuneScope, TuneTrigger,
    };
    pub use crate::backoff::{Backoff, Step};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::ReconcilerConfig;
    pub use crate::core::{
        ExecutorKind, LoopOptions, LoopStrategy, Pipeline, PipelineStatus, PipelineTask,
        TaskLoop, TaskTimeout,
    };
    pub use crate::errors::{ErrorKind, ReconcileError, Result};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, TaskEvent, TaskEventKind};
    pub use crate::expression::{ExpressionEvaluator, SimpleExpression};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::ports::{
        ActionResolver, Executor, ExecutorRegistry, ExecutorStatus, InMemoryThrottler,
        ReconcilerPorts, ReportService, TaskStore, Throttler,
    };
    pub use crate::reconciler::{TaskReconciler, TaskRequest};
    pub use crate::taskrun::{Op, TaskOp, TaskRun};
}
