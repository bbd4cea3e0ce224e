//! Static action resolver.

use crate::core::{Pipeline, PipelineTask};
use crate::errors::{ReconcileError, Result};
use crate::ports::{ActionResolver, Resolution, ResolvedAction};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An [`ActionResolver`] that returns the same action for every task.
#[derive(Debug, Default)]
pub struct StaticActionResolver {
    action: ResolvedAction,
    need_retries: AtomicUsize,
    user_error: Option<String>,
    calls: AtomicUsize,
}

impl StaticActionResolver {
    /// Resolves every task to `action`.
    #[must_use]
    pub fn new(action: ResolvedAction) -> Self {
        Self {
            action,
            ..Self::default()
        }
    }

    /// Answers `NeedRetry` for the first `n` calls.
    #[must_use]
    pub fn with_need_retries(self, n: usize) -> Self {
        self.need_retries.store(n, Ordering::SeqCst);
        self
    }

    /// Fails every call with a user error.
    #[must_use]
    pub fn with_user_error(mut self, msg: impl Into<String>) -> Self {
        self.user_error = Some(msg.into());
        self
    }

    /// Number of `resolve` calls.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionResolver for StaticActionResolver {
    async fn resolve(&self, _pipeline: &Pipeline, task: &PipelineTask) -> Result<Resolution> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = &self.user_error {
            return Err(ReconcileError::user(msg.clone()));
        }
        let retrying = self
            .need_retries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if retrying.is_ok() {
            return Ok(Resolution::NeedRetry(format!("action {} not ready", task.action_type)));
        }
        Ok(Resolution::Ready(self.action.clone()))
    }
}
