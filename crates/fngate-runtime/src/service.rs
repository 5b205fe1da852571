//! Creates execution contexts and runs handlers in them.

use std::{
    any::Any,
    collections::HashSet,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use fngate_core::{
    handler::is_non_retriable, BoxError, Clock, ContextLogger, Event, EventSink, FunctionMetadata,
    Step, StepRecord,
};
use futures::FutureExt;
use serde_json::Value;
use tracing::{error, info, warn, Instrument};

use crate::{
    context::{ActiveRegistration, ActiveSet, ExecutionContext},
    error::{Result, RuntimeError},
    tools::InvocationStepTools,
};

/// Result of a successful invocation.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Execution id.
    pub execution_id: String,
    /// Value returned by the handler.
    pub result: Value,
    /// Wall time spent in the handler.
    pub duration: Duration,
    /// Steps the handler ran.
    pub steps: Vec<StepRecord>,
}

/// Runs registered handlers with isolated per-invocation state.
pub struct ExecutionContextService {
    clock: Arc<dyn Clock>,
    sink: Option<Arc<dyn EventSink>>,
    active: ActiveSet,
}

impl std::fmt::Debug for ExecutionContextService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContextService")
            .field("has_sink", &self.sink.is_some())
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl ExecutionContextService {
    /// Creates a service without an outbound sink.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, sink: None, active: Arc::new(Mutex::new(HashSet::new())) }
    }

    /// Routes `step.send_event` through `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Prepares an invocation and marks it active.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::AlreadyRunning`] if the same function, run
    /// and attempt is already executing.
    pub fn create_context(
        &self,
        function: Arc<FunctionMetadata>,
        event: Event,
        run_id: impl Into<String>,
        attempt: u32,
    ) -> Result<ExecutionContext> {
        let run_id = run_id.into();
        let execution_id = ExecutionContext::execution_id_for(function.id(), &run_id, attempt);

        let registration = ActiveRegistration::register(&self.active, &execution_id).ok_or_else(|| {
            warn!(execution_id = %execution_id, "duplicate concurrent execution rejected");
            RuntimeError::AlreadyRunning { execution_id: execution_id.clone() }
        })?;

        let tools = InvocationStepTools::new(Arc::clone(&self.clock), self.sink.clone());
        let logger = ContextLogger::for_invocation(function.id(), &run_id, attempt, &execution_id);

        Ok(ExecutionContext {
            execution_id,
            function,
            event,
            step: Step::new(Arc::new(tools)),
            logger,
            run_id,
            attempt,
            started_at: self.clock.now(),
            started_wall: self.clock.now_utc(),
            _active: registration,
        })
    }

    /// Runs the handler of `context` once.
    ///
    /// The context is consumed; its active-index entry is removed when this
    /// future completes or is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Handler`] wrapping the handler's error. A
    /// panic inside the handler is reported the same way.
    pub async fn execute(&self, context: ExecutionContext) -> Result<ExecutionOutcome> {
        let handler = context.function.handler.resolve();
        let span = context.logger.span().clone();
        let handler_ctx = context.handler_context();
        let event = context.event.clone();

        let outcome = async {
            info!(event = %event.name, "function started");
            AssertUnwindSafe(handler.handle(event, handler_ctx)).catch_unwind().await
        }
        .instrument(span.clone())
        .await;

        let duration = self.clock.now().saturating_duration_since(context.started_at);
        let duration_ms = duration.as_millis() as u64;

        let source: BoxError = match outcome {
            Ok(Ok(result)) => {
                span.in_scope(|| info!(duration_ms, "function completed"));
                return Ok(ExecutionOutcome {
                    execution_id: context.execution_id.clone(),
                    result,
                    duration,
                    steps: context.step.journal(),
                });
            },
            Ok(Err(e)) => e,
            Err(panic) => panic_message(panic).into(),
        };

        let no_retry = is_non_retriable(source.as_ref());
        span.in_scope(|| error!(duration_ms, no_retry, error = %source, "function failed"));

        Err(RuntimeError::Handler {
            function_id: context.function_id().to_string(),
            run_id: context.run_id.clone(),
            attempt: context.attempt,
            no_retry,
            source,
        })
    }

    /// Creates a context and executes it.
    ///
    /// # Errors
    ///
    /// See [`create_context`](Self::create_context) and
    /// [`execute`](Self::execute).
    pub async fn run(
        &self,
        function: Arc<FunctionMetadata>,
        event: Event,
        run_id: impl Into<String>,
        attempt: u32,
    ) -> Result<ExecutionOutcome> {
        let context = self.create_context(function, event, run_id, attempt)?;
        self.execute(context).await
    }

    /// Number of invocations in flight.
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether `execution_id` is in flight.
    pub fn is_active(&self, execution_id: &str) -> bool {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).contains(execution_id)
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("handler panicked: {detail}")
}
