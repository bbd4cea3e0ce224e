//! Fakes for exercising the reconciler without real collaborators.
//!
//! This module provides:
//! - An in-memory task store with write counting and failure injection
//! - A scripted executor that replays a sequence of job statuses
//! - A report service that records what it is given
//! - An action resolver returning a fixed resolution

mod executor;
mod report;
mod resolver;
mod store;

pub use crate::events::CollectingEventSink;
pub use executor::ScriptedExecutor;
pub use report::RecordingReportService;
pub use resolver::StaticActionResolver;
pub use store::InMemoryTaskStore;
