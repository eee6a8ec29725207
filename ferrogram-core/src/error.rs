//! Error types for ferrogram.
//!
//! The taxonomy mirrors how the engine reacts to a failure:
//!
//! - [`FetchError`] - failures of the remote long-poll, classified into
//!   transient, fatal and remote-side errors
//! - [`SubmitError`] - executor flow control (saturation) and shutdown
//! - [`HandlerError`] - faults raised inside a lane, surfaced to post-interceptors
//! - [`RouteError`] - invalid callback route templates
//! - [`IngestionError`] - terminal results of the ingestion loop
//! - [`FerrogramError`] - top-level error for engine assembly and runs

use std::time::Duration;
use thiserror::Error;

/// A boxed error type for dynamic error handling.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for ferrogram operations.
#[derive(Error, Debug)]
pub enum FerrogramError {
    /// The ingestion loop terminated abnormally.
    #[error("ingestion error: {0}")]
    Ingestion(#[from] IngestionError),

    /// A callback route could not be registered.
    #[error("routing error: {0}")]
    Route(#[from] RouteError),

    /// The configuration is invalid or could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The executor could not be started.
    #[error("executor failed to start")]
    Executor(#[source] BoxError),

    /// A required component was not supplied to the builder.
    #[error("missing component: {0}")]
    Missing(&'static str),
}

/// Failures reported by an [`UpdateSource`](crate::UpdateSource).
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport-level failure; retried with exponential backoff.
    #[error("network error")]
    Network(#[source] BoxError),

    /// The long-poll did not complete in time; retried with backoff.
    #[error("fetch timed out")]
    Timeout,

    /// Credentials were rejected. Fatal.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Another consumer owns the stream. Fatal.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other error response from the remote side.
    #[error("remote error {code}: {description}")]
    Remote {
        code: i32,
        description: String,
        /// Delay requested by the server before retrying, if any.
        retry_after: Option<Duration>,
    },
}

impl FetchError {
    /// Whether this failure must stop ingestion.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::Unauthorized(_) | FetchError::Conflict(_))
    }

    /// Whether this failure is a transport problem eligible for backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::Timeout)
    }
}

/// A task the executor refused. The task is handed back so the caller can
/// retry the same unit of work.
#[derive(Error)]
pub enum SubmitError<T> {
    /// The selected lane's queue is full. Backpressure, not a fault.
    #[error("lane {lane} saturated")]
    Saturated { lane: usize, task: T },

    /// The executor no longer accepts work.
    #[error("executor has been shut down")]
    ShutDown(T),
}

impl<T> SubmitError<T> {
    /// Recover the rejected task.
    pub fn into_task(self) -> T {
        match self {
            SubmitError::Saturated { task, .. } | SubmitError::ShutDown(task) => task,
        }
    }

    pub fn is_saturated(&self) -> bool {
        matches!(self, SubmitError::Saturated { .. })
    }
}

impl<T> std::fmt::Debug for SubmitError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::Saturated { lane, .. } => {
                f.debug_struct("Saturated").field("lane", lane).finish()
            }
            SubmitError::ShutDown(_) => f.write_str("ShutDown"),
        }
    }
}

/// A fault raised while handling an update inside a lane.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Failed(#[source] BoxError),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl From<BoxError> for HandlerError {
    fn from(err: BoxError) -> Self {
        HandlerError::Failed(err)
    }
}

/// Errors raised while compiling a callback route template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Malformed template syntax.
    #[error("invalid route template `{template}`: {reason}")]
    InvalidTemplate { template: String, reason: String },

    /// The same variable name appears twice.
    #[error("duplicate variable `{name}` in route template `{template}`")]
    DuplicateVariable { template: String, name: String },
}

/// Terminal results of the ingestion loop.
#[derive(Error, Debug)]
pub enum IngestionError {
    /// A fatal remote error stopped ingestion.
    #[error("ingestion halted: {0}")]
    Fatal(#[source] FetchError),

    /// `run` was called while the loop was already running.
    #[error("ingestion loop is already running")]
    AlreadyRunning,

    /// The persisted cursor could not be read at startup.
    #[error("failed to load cursor")]
    Cursor(#[source] BoxError),

    /// The executor stopped accepting work while updates were pending.
    #[error("executor shut down during ingestion")]
    ExecutorShutDown,
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A value failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The configuration sources could not be read or parsed.
    #[error("failed to load configuration: {0}")]
    Load(String),
}
