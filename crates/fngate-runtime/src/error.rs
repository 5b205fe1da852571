//! Execution failures.

use fngate_core::{BoxError, ErrorKind};
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Failure to set up or run a handler invocation.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// An invocation with the same execution id is still running.
    #[error("execution `{execution_id}` is already in progress")]
    AlreadyRunning {
        /// `{function_id}-{run_id}-{attempt}`
        execution_id: String,
    },

    /// The handler returned an error or panicked.
    #[error("function `{function_id}` failed (run {run_id}, attempt {attempt}): {source}")]
    Handler {
        /// Function that failed
        function_id: String,
        /// Platform run id
        run_id: String,
        /// Attempt number
        attempt: u32,
        /// Whether the platform should stop retrying
        no_retry: bool,
        /// The handler's own error
        #[source]
        source: BoxError,
    },
}

impl RuntimeError {
    /// Taxonomy kind.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Runtime
    }

    /// Fine-grained machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning { .. } => "EXECUTION_IN_PROGRESS",
            Self::Handler { no_retry: true, .. } => "NON_RETRIABLE_ERROR",
            Self::Handler { .. } => "FUNCTION_EXECUTION_ERROR",
        }
    }

    /// Whether the platform should not re-invoke.
    pub fn is_non_retriable(&self) -> bool {
        matches!(self, Self::Handler { no_retry: true, .. })
    }

    /// Function id, when known.
    pub fn function_id(&self) -> Option<&str> {
        match self {
            Self::Handler { function_id, .. } => Some(function_id),
            Self::AlreadyRunning { .. } => None,
        }
    }
}
