//! Scripted executor.

use crate::core::{ExecutorKind, PipelineStatus, PipelineTask};
use crate::errors::{ReconcileError, Result};
use crate::ports::{Executor, ExecutorStatus, Existence};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// An [`Executor`] that replays job statuses.
///
/// Each `status` call takes the next scripted status; the last one repeats
/// forever. An empty script reports `Running`.
#[derive(Debug)]
pub struct ScriptedExecutor {
    kind: ExecutorKind,
    statuses: Mutex<VecDeque<ExecutorStatus>>,
    inspect: String,
    created: AtomicBool,
    started: AtomicBool,
    failing_creates: AtomicUsize,
    create_calls: AtomicUsize,
    start_calls: AtomicUsize,
    status_calls: AtomicUsize,
    inspect_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

impl ScriptedExecutor {
    /// Creates an executor of the given kind with an empty script.
    #[must_use]
    pub fn new(kind: ExecutorKind) -> Self {
        Self {
            kind,
            statuses: Mutex::new(VecDeque::new()),
            inspect: String::new(),
            created: AtomicBool::new(false),
            started: AtomicBool::new(false),
            failing_creates: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            inspect_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }

    /// Sets the statuses reported by successive `status` calls.
    #[must_use]
    pub fn with_statuses(self, statuses: impl IntoIterator<Item = PipelineStatus>) -> Self {
        *self.statuses.lock() = statuses.into_iter().map(ExecutorStatus::new).collect();
        self
    }

    /// Sets the diagnostics returned by `inspect`.
    #[must_use]
    pub fn with_inspect(mut self, inspect: impl Into<String>) -> Self {
        self.inspect = inspect.into();
        self
    }

    /// Pretends the job already exists and, optionally, already runs.
    #[must_use]
    pub fn with_existing_job(self, started: bool) -> Self {
        self.created.store(true, Ordering::SeqCst);
        self.started.store(started, Ordering::SeqCst);
        self
    }

    /// Makes the next `n` `create` calls fail with a platform error.
    #[must_use]
    pub fn with_failing_creates(self, n: usize) -> Self {
        self.failing_creates.store(n, Ordering::SeqCst);
        self
    }

    /// Number of `create` calls.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of `start` calls.
    #[must_use]
    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Number of `status` calls.
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Number of `inspect` calls.
    #[must_use]
    pub fn inspect_calls(&self) -> usize {
        self.inspect_calls.load(Ordering::SeqCst)
    }

    /// Number of `cancel` calls.
    #[must_use]
    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn kind(&self) -> ExecutorKind {
        self.kind
    }

    async fn exist(&self, _task: &PipelineTask) -> Result<Existence> {
        Ok(Existence {
            created: self.created.load(Ordering::SeqCst),
            started: self.started.load(Ordering::SeqCst),
        })
    }

    async fn create(&self, _task: &PipelineTask) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(ReconcileError::platform("executor refused create"));
        }
        self.created.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self, _task: &PipelineTask) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn status(&self, _task: &PipelineTask) -> Result<ExecutorStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock();
        let next = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        Ok(next.unwrap_or_else(|| ExecutorStatus::new(PipelineStatus::Running)))
    }

    async fn inspect(&self, _task: &PipelineTask) -> Result<String> {
        self.inspect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.inspect.clone())
    }

    async fn cancel(&self, _task: &PipelineTask) -> Result<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
