//! Handler and step-tool contracts.
//!
//! Handlers are invoked with the triggering [`Event`] and a
//! [`HandlerContext`]. Step primitives are reached through [`Step`], a thin
//! typed wrapper over the object-safe [`StepTools`] implemented by the
//! runtime.

use std::{error::Error, fmt, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    error::{BoxError, EventError},
    event::{Event, SendReceipt},
};

/// A registered function body.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    /// Runs the function for one invocation.
    async fn handle(&self, event: Event, ctx: HandlerContext) -> Result<Value, BoxError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> FunctionHandler for FnHandler<F>
where
    F: Fn(Event, HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BoxError>> + Send,
{
    async fn handle(&self, event: Event, ctx: HandlerContext) -> Result<Value, BoxError> {
        (self.0)(event, ctx).await
    }
}

/// Wraps an async closure as a [`FunctionHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn FunctionHandler>
where
    F: Fn(Event, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Produces a fresh handler for each invocation.
pub trait HandlerFactory: Send + Sync {
    /// Creates the handler used for one invocation.
    fn create(&self) -> Arc<dyn FunctionHandler>;
}

impl<F> HandlerFactory for F
where
    F: Fn() -> Arc<dyn FunctionHandler> + Send + Sync,
{
    fn create(&self) -> Arc<dyn FunctionHandler> {
        self()
    }
}

/// How a registered function obtains its handler.
#[derive(Clone)]
pub enum HandlerSource {
    /// One handler shared by all invocations.
    Shared(Arc<dyn FunctionHandler>),
    /// A new handler per invocation.
    Factory(Arc<dyn HandlerFactory>),
}

impl HandlerSource {
    /// Returns the handler to use for the next invocation.
    pub fn resolve(&self) -> Arc<dyn FunctionHandler> {
        match self {
            Self::Shared(handler) => Arc::clone(handler),
            Self::Factory(factory) => factory.create(),
        }
    }
}

impl fmt::Debug for HandlerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared(_) => f.write_str("HandlerSource::Shared"),
            Self::Factory(_) => f.write_str("HandlerSource::Factory"),
        }
    }
}

/// Everything a handler receives besides the event.
#[derive(Clone)]
pub struct HandlerContext {
    /// Step primitives.
    pub step: Step,
    /// Logger scoped to this invocation.
    pub logger: ContextLogger,
    /// Platform run id.
    pub run_id: String,
    /// Zero-based attempt number.
    pub attempt: u32,
    /// Id of the function being run.
    pub function_id: String,
    /// `{function_id}-{run_id}-{attempt}`.
    pub execution_id: String,
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("function_id", &self.function_id)
            .field("run_id", &self.run_id)
            .field("attempt", &self.attempt)
            .field("execution_id", &self.execution_id)
            .finish_non_exhaustive()
    }
}

/// Logger bound to one invocation.
///
/// Every record is emitted inside a span carrying `function_id`, `run_id`,
/// `attempt` and `execution_id`.
#[derive(Debug, Clone)]
pub struct ContextLogger {
    span: tracing::Span,
}

impl ContextLogger {
    /// Wraps an existing span.
    pub fn new(span: tracing::Span) -> Self {
        Self { span }
    }

    /// Creates the invocation span.
    pub fn for_invocation(function_id: &str, run_id: &str, attempt: u32, execution_id: &str) -> Self {
        Self::new(tracing::info_span!(
            "function",
            function_id = %function_id,
            run_id = %run_id,
            attempt,
            execution_id = %execution_id,
        ))
    }

    /// Underlying span.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Logs at info level.
    pub fn info(&self, message: &str) {
        self.span.in_scope(|| info!("{message}"));
    }

    /// Logs at warn level.
    pub fn warn(&self, message: &str) {
        self.span.in_scope(|| warn!("{message}"));
    }

    /// Logs at error level.
    pub fn error(&self, message: &str) {
        self.span.in_scope(|| error!("{message}"));
    }

    /// Logs at debug level.
    pub fn debug(&self, message: &str) {
        self.span.in_scope(|| tracing::debug!("{message}"));
    }
}

/// Kind of step primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// `run`
    Run,
    /// `sleep`, `sleep_for`, `sleep_until`
    Sleep,
    /// `send_event`
    SendEvent,
    /// `wait_for_event`
    WaitForEvent,
    /// `invoke`
    Invoke,
    /// `ai_infer`
    AiInfer,
}

/// How a step ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "error")]
pub enum StepOutcome {
    /// Still executing.
    Pending,
    /// Finished successfully.
    Completed,
    /// Returned an error.
    Failed(String),
}

/// One entry of the per-invocation step journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Position within the invocation, starting at 0.
    pub sequence: u64,
    /// Step id given by the handler.
    pub step_id: String,
    /// Primitive used.
    pub kind: StepKind,
    /// Result.
    pub outcome: StepOutcome,
}

/// Failures raised by step primitives.
#[derive(Debug, Error)]
pub enum StepError {
    /// Duration string did not match `<number>(ms|s|m|h)`.
    #[error("invalid duration `{input}`: expected a number followed by ms, s, m or h")]
    InvalidDuration {
        /// The rejected input
        input: String,
    },

    /// Operation requires the durable-execution server.
    #[error("step.{operation} is not supported by this gateway")]
    NotSupported {
        /// Primitive name
        operation: &'static str,
    },

    /// `send_event` could not deliver.
    #[error("step `{step_id}` failed to send events: {source}")]
    SendFailed {
        /// Step id
        step_id: String,
        /// Underlying send error
        #[source]
        source: EventError,
    },

    /// No outbound sink is configured.
    #[error("step `{step_id}` cannot send events: no event sink configured")]
    NoEventSink {
        /// Step id
        step_id: String,
    },
}

/// Step primitives implemented by the runtime.
///
/// Object safe; [`Step`] layers the generic `run` on top.
#[async_trait]
pub trait StepTools: Send + Sync {
    /// Records the start of a step and returns its sequence number.
    fn begin(&self, step_id: &str, kind: StepKind) -> u64;

    /// Records how the step identified by `sequence` ended.
    fn finish(&self, sequence: u64, outcome: StepOutcome);

    /// Snapshot of the journal.
    fn journal(&self) -> Vec<StepRecord>;

    /// Sleeps for a duration string such as `1.5s`.
    async fn sleep(&self, step_id: &str, duration: &str) -> Result<(), StepError>;

    /// Sleeps for `duration`.
    async fn sleep_for(&self, step_id: &str, duration: Duration) -> Result<(), StepError>;

    /// Sleeps until `until`; returns immediately if it is in the past.
    async fn sleep_until(&self, step_id: &str, until: DateTime<Utc>) -> Result<(), StepError>;

    /// Sends events through the outbound sink.
    async fn send_event(&self, step_id: &str, events: Vec<Event>) -> Result<SendReceipt, StepError>;

    /// Waits for a matching event. Requires the durable-execution server.
    async fn wait_for_event(
        &self,
        step_id: &str,
        event: &str,
        timeout: &str,
    ) -> Result<Option<Event>, StepError>;

    /// Invokes another function. Requires the durable-execution server.
    async fn invoke(&self, step_id: &str, function_id: &str, data: Value) -> Result<Value, StepError>;

    /// Runs a model inference. Requires the durable-execution server.
    async fn ai_infer(&self, step_id: &str, request: Value) -> Result<Value, StepError>;
}

/// Typed step API handed to handlers.
#[derive(Clone)]
pub struct Step {
    tools: Arc<dyn StepTools>,
}

impl Step {
    /// Wraps a step-tool implementation.
    pub fn new(tools: Arc<dyn StepTools>) -> Self {
        Self { tools }
    }

    /// Runs `f` once as step `step_id`.
    ///
    /// The closure's error is returned unchanged; nothing is retried here.
    pub async fn run<T, E, F, Fut>(&self, step_id: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let sequence = self.tools.begin(step_id, StepKind::Run);
        info!(step_id, sequence, "step started");
        let started = std::time::Instant::now();

        match f().await {
            Ok(value) => {
                info!(
                    step_id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "step completed"
                );
                self.tools.finish(sequence, StepOutcome::Completed);
                Ok(value)
            },
            Err(e) => {
                error!(
                    step_id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "step failed"
                );
                self.tools.finish(sequence, StepOutcome::Failed(e.to_string()));
                Err(e)
            },
        }
    }

    /// See [`StepTools::sleep`].
    pub async fn sleep(&self, step_id: &str, duration: &str) -> Result<(), StepError> {
        self.tools.sleep(step_id, duration).await
    }

    /// See [`StepTools::sleep_for`].
    pub async fn sleep_for(&self, step_id: &str, duration: Duration) -> Result<(), StepError> {
        self.tools.sleep_for(step_id, duration).await
    }

    /// See [`StepTools::sleep_until`].
    pub async fn sleep_until(&self, step_id: &str, until: DateTime<Utc>) -> Result<(), StepError> {
        self.tools.sleep_until(step_id, until).await
    }

    /// See [`StepTools::send_event`].
    pub async fn send_event(&self, step_id: &str, events: Vec<Event>) -> Result<SendReceipt, StepError> {
        self.tools.send_event(step_id, events).await
    }

    /// See [`StepTools::wait_for_event`].
    pub async fn wait_for_event(
        &self,
        step_id: &str,
        event: &str,
        timeout: &str,
    ) -> Result<Option<Event>, StepError> {
        self.tools.wait_for_event(step_id, event, timeout).await
    }

    /// See [`StepTools::invoke`].
    pub async fn invoke(&self, step_id: &str, function_id: &str, data: Value) -> Result<Value, StepError> {
        self.tools.invoke(step_id, function_id, data).await
    }

    /// See [`StepTools::ai_infer`].
    pub async fn ai_infer(&self, step_id: &str, request: Value) -> Result<Value, StepError> {
        self.tools.ai_infer(step_id, request).await
    }

    /// Steps recorded so far in this invocation.
    pub fn journal(&self) -> Vec<StepRecord> {
        self.tools.journal()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").finish_non_exhaustive()
    }
}

/// Outbound event destination used by `send_event`.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Validates and sends `events` as one request.
    async fn send_events(&self, events: Vec<Event>) -> Result<SendReceipt, EventError>;
}

/// Handler error the platform must not retry.
///
/// ```
/// use fngate_core::{handler::is_non_retriable, BoxError, NonRetriableError};
///
/// let err: BoxError = Box::new(NonRetriableError::new("card declined"));
/// assert!(is_non_retriable(err.as_ref()));
/// ```
#[derive(Debug, Error)]
#[error("{message}")]
pub struct NonRetriableError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl NonRetriableError {
    /// Creates a non-retriable error.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), source: None }
    }

    /// Attaches a cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Whether `error` or any of its causes is a [`NonRetriableError`].
pub fn is_non_retriable(error: &(dyn Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(e) = current {
        if e.is::<NonRetriableError>() {
            return true;
        }
        current = e.source();
    }
    false
}
