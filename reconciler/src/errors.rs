//! Error types for the reconciler.
//!
//! Every failure is classified as either a **user** error (bad configuration or
//! action definition, surfaced on the task and never retried) or a **platform**
//! error (transient infrastructure trouble, retried by rolling the task back to
//! its pre-phase status). Network failures are a platform sub-class that only
//! changes operator-facing messages.

use crate::aop::{TuneScope, TuneTrigger};
use crate::taskrun::Op;
use thiserror::Error;

/// Classification of a [`ReconcileError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caused by the pipeline author; retrying does not help.
    User,
    /// Caused by the platform or its dependencies; a bare retry is appropriate.
    Platform,
}

/// The main error type for reconciler operations.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// An error caused by user configuration.
    #[error("{0}")]
    User(String),

    /// A transient platform error.
    #[error("{0}")]
    Platform(String),

    /// A network failure while talking to a collaborator.
    #[error("network error: {0}")]
    Network(String),

    /// A record was not found in the store.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record (e.g. "task").
        entity: &'static str,
        /// Record id.
        id: u64,
    },

    /// No executor is registered for the task's executor kind.
    #[error("executor not found: {0}")]
    ExecutorNotFound(String),

    /// The worker running a phase panicked.
    #[error("{op} panicked: {message}")]
    Panicked {
        /// Phase that was running.
        op: Op,
        /// Panic payload rendered as text.
        message: String,
    },

    /// A backoff loop was cancelled before finishing.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A backoff loop reached its iteration ceiling.
    #[error("loop exceeded max times ({0})")]
    LoopExhausted(u64),

    /// The tune engine was used before it was built.
    #[error("aop not initialized")]
    AopNotInitialized,

    /// A tune point name was registered twice under one scope.
    #[error("tune point {name:?} already registered under scope {scope}")]
    DuplicateTunePoint {
        /// Scope of the duplicate.
        scope: TuneScope,
        /// Name of the duplicate.
        name: String,
    },

    /// The tune configuration references a tune point that was never registered.
    #[error("tune point {name:?} configured for {scope}/{trigger} is not registered")]
    UnknownTunePoint {
        /// Scope of the reference.
        scope: TuneScope,
        /// Trigger of the reference.
        trigger: TuneTrigger,
        /// Unresolved name.
        name: String,
    },

    /// An expression could not be parsed or evaluated.
    #[error("invalid expression {expr:?}: {reason}")]
    Expression {
        /// The offending expression.
        expr: String,
        /// Why it failed.
        reason: String,
    },

    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReconcileError {
    /// Creates a user error.
    pub fn user(msg: impl Into<String>) -> Self {
        Self::User(msg.into())
    }

    /// Creates a platform error.
    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform(msg.into())
    }

    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Returns how this error should be treated by the reconciler.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::User(_) | Self::Expression { .. } => ErrorKind::User,
            _ => ErrorKind::Platform,
        }
    }

    /// Returns true for user-classified errors.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        self.kind() == ErrorKind::User
    }

    /// Returns true for platform-classified errors.
    #[must_use]
    pub fn is_platform_error(&self) -> bool {
        self.kind() == ErrorKind::Platform
    }

    /// Returns true when the error looks like a network failure.
    ///
    /// Only used to word operator messages.
    #[must_use]
    pub fn is_network(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Platform(msg) => {
                let msg = msg.to_ascii_lowercase();
                ["connection refused", "connection reset", "timed out", "i/o timeout", "broken pipe", "no route to host"]
                    .iter()
                    .any(|needle| msg.contains(needle))
            }
            _ => false,
        }
    }
}

/// Returns true if any error in the list is user-classified.
#[must_use]
pub fn contains_user_error(errors: &[ReconcileError]) -> bool {
    errors.iter().any(ReconcileError::is_user_error)
}

/// Convenience result alias.
pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;
