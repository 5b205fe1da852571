//! One handler invocation's state.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

use chrono::{DateTime, Utc};
use fngate_core::{ContextLogger, Event, FunctionMetadata, HandlerContext, Step};

/// Set of execution ids currently running.
pub(crate) type ActiveSet = Arc<Mutex<HashSet<String>>>;

/// Removes an execution id from the active set when dropped.
///
/// Lives inside [`ExecutionContext`], so the entry disappears on every exit
/// path: completion, error, panic unwinding and future cancellation.
#[derive(Debug)]
pub(crate) struct ActiveRegistration {
    active: ActiveSet,
    execution_id: String,
}

impl ActiveRegistration {
    /// Inserts `execution_id`, or returns `None` if it is already present.
    pub(crate) fn register(active: &ActiveSet, execution_id: &str) -> Option<Self> {
        let inserted = active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(execution_id.to_string());
        inserted.then(|| Self { active: Arc::clone(active), execution_id: execution_id.to_string() })
    }
}

impl Drop for ActiveRegistration {
    fn drop(&mut self) {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.execution_id);
    }
}

/// Everything needed to run one invocation.
#[derive(Debug)]
pub struct ExecutionContext {
    /// `{function_id}-{run_id}-{attempt}`.
    pub execution_id: String,
    /// The function being run.
    pub function: Arc<FunctionMetadata>,
    /// Triggering event.
    pub event: Event,
    /// Step tools for this invocation.
    pub step: Step,
    /// Invocation-scoped logger.
    pub logger: ContextLogger,
    /// Platform run id.
    pub run_id: String,
    /// Attempt number.
    pub attempt: u32,
    /// Monotonic start, for duration.
    pub started_at: Instant,
    /// Wall-clock start.
    pub started_wall: DateTime<Utc>,
    pub(crate) _active: ActiveRegistration,
}

impl ExecutionContext {
    /// Builds an execution id.
    pub fn execution_id_for(function_id: &str, run_id: &str, attempt: u32) -> String {
        format!("{function_id}-{run_id}-{attempt}")
    }

    /// Function id.
    pub fn function_id(&self) -> &str {
        self.function.id()
    }

    /// The value handed to the handler.
    pub fn handler_context(&self) -> HandlerContext {
        HandlerContext {
            step: self.step.clone(),
            logger: self.logger.clone(),
            run_id: self.run_id.clone(),
            attempt: self.attempt,
            function_id: self.function_id().to_string(),
            execution_id: self.execution_id.clone(),
        }
    }
}
