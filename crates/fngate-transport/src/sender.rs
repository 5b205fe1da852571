//! Validating, batching event transport.
//!
//! [`EventTransport`] is the single outbound path: it checks preconditions,
//! validates every event with full error accumulation, applies schema
//! transforms, stamps timestamps, and drives each request through the
//! [`ConnectionPool`].

use std::sync::Arc;

use async_trait::async_trait;
use fngate_core::{
    Clock, Event, EventError, EventSink, EventValidator, SendReceipt, ValidationCode,
    ValidationErrorDetail, ValidationErrorReporter, ValidationOptions,
};
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    client::EventBackend,
    pool::{ConnectionPool, RequestOptions},
};

/// Outbound send settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Credential for the event API; sends fail without it.
    pub event_key: Option<String>,
    /// Events per request.
    pub max_batch_size: usize,
    /// Chunks of a `send_batch` in flight at once.
    pub concurrency_limit: usize,
    /// Priority of event requests in the pool queue.
    pub priority: i32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { event_key: None, max_batch_size: 100, concurrency_limit: 5, priority: 0 }
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("event_key", &self.event_key.as_ref().map(|_| "***"))
            .field("max_batch_size", &self.max_batch_size)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Outcome of one chunk of a batch.
#[derive(Debug)]
pub struct ChunkReport {
    /// Position of the chunk in the batch.
    pub index: usize,
    /// Events in the chunk.
    pub event_count: usize,
    /// All-or-nothing result for the chunk.
    pub result: Result<SendReceipt, EventError>,
}

/// Per-chunk outcomes of [`EventTransport::send_batch`], in chunk order.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Chunk outcomes.
    pub chunks: Vec<ChunkReport>,
}

impl BatchReport {
    /// Events across all chunks.
    pub fn total_events(&self) -> usize {
        self.chunks.iter().map(|c| c.event_count).sum()
    }

    /// Events in chunks that were accepted.
    pub fn sent_events(&self) -> usize {
        self.chunks.iter().filter(|c| c.result.is_ok()).map(|c| c.event_count).sum()
    }

    /// Chunks that failed.
    pub fn failed_chunks(&self) -> impl Iterator<Item = &ChunkReport> {
        self.chunks.iter().filter(|c| c.result.is_err())
    }

    /// Whether every chunk was accepted.
    pub fn is_success(&self) -> bool {
        self.chunks.iter().all(|c| c.result.is_ok())
    }

    /// Platform ids of accepted events, in order.
    pub fn ids(&self) -> Vec<String> {
        self.chunks
            .iter()
            .filter_map(|c| c.result.as_ref().ok())
            .flat_map(|receipt| receipt.ids.iter().cloned())
            .collect()
    }
}

/// Validates and sends events to the platform.
pub struct EventTransport {
    config: TransportConfig,
    validator: EventValidator,
    backend: Arc<dyn EventBackend>,
    pool: Arc<ConnectionPool>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for EventTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTransport")
            .field("config", &self.config)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

impl EventTransport {
    /// Creates a transport with a default validator.
    pub fn new(
        config: TransportConfig,
        pool: Arc<ConnectionPool>,
        backend: Arc<dyn EventBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            validator: EventValidator::new(ValidationOptions::default()),
            backend,
            pool,
            clock,
        }
    }

    /// Replaces the validator (strict mode, size limit, schemas).
    #[must_use]
    pub fn with_validator(mut self, validator: EventValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The pool requests go through.
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// The validator in use.
    pub fn validator(&self) -> &EventValidator {
        &self.validator
    }

    fn require_event_key(&self) -> Result<(), EventError> {
        match self.config.event_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => Err(EventError::MissingEventKey),
        }
    }

    /// Sends a single event, reporting validation errors under `event`.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_event(&self, event: Event) -> Result<SendReceipt, EventError> {
        self.require_event_key()?;

        self.check_event(&event)?;
        let event = self.prepare(event);
        // The schema transform may have produced an invalid event.
        self.check_event(&event)?;

        self.deliver(vec![event]).await
    }

    /// Sends up to `max_batch_size` events in one request.
    ///
    /// # Errors
    ///
    /// - [`EventError::MissingEventKey`] if no event key is configured
    /// - [`EventError::Validation`] listing every problem, including
    ///   `BATCH_EMPTY` and `BATCH_TOO_LARGE`
    /// - [`EventError::Delivery`] once the retry policy is exhausted
    pub async fn send(&self, events: Vec<Event>) -> Result<SendReceipt, EventError> {
        self.require_event_key()?;
        self.validate_all(&events, true)?;

        let prepared: Vec<Event> = events.into_iter().map(|e| self.prepare(e)).collect();
        self.validate_all(&prepared, true)?;
        self.deliver(prepared).await
    }

    /// Sends any number of events in chunks of `max_batch_size`.
    ///
    /// Up to `concurrency_limit` chunks are in flight at once. Each chunk
    /// succeeds or fails as a whole; the report lists chunks in order.
    ///
    /// # Errors
    ///
    /// Only precondition and validation failures are returned as errors;
    /// nothing is sent in that case. Delivery failures are reported per
    /// chunk.
    pub async fn send_batch(&self, events: Vec<Event>) -> Result<BatchReport, EventError> {
        self.require_event_key()?;
        self.validate_all(&events, false)?;

        let prepared: Vec<Event> = events.into_iter().map(|e| self.prepare(e)).collect();
        self.validate_all(&prepared, false)?;

        let chunk_size = self.config.max_batch_size.max(1);
        let total = prepared.len();
        let mut chunks: Vec<Vec<Event>> = Vec::with_capacity(total.div_ceil(chunk_size));
        let mut events = prepared.into_iter().peekable();
        while events.peek().is_some() {
            chunks.push(events.by_ref().take(chunk_size).collect());
        }

        info!(events = total, chunks = chunks.len(), "sending event batch");

        let reports = stream::iter(chunks.into_iter().enumerate())
            .map(|(index, chunk)| async move {
                let event_count = chunk.len();
                let result = self.deliver(chunk).await;
                if let Err(e) = &result {
                    warn!(chunk = index, event_count, error = %e, "batch chunk failed");
                }
                ChunkReport { index, event_count, result }
            })
            .buffered(self.config.concurrency_limit.max(1))
            .collect::<Vec<_>>()
            .await;

        Ok(BatchReport { chunks: reports })
    }

    fn check_event(&self, event: &Event) -> Result<(), EventError> {
        let report = self.validator.validate(event);
        if report.is_valid {
            return Ok(());
        }
        warn!(summary = report.summary.as_deref().unwrap_or_default(), "event rejected by validation");
        Err(EventError::Validation { report })
    }

    fn validate_all(&self, events: &[Event], enforce_max: bool) -> Result<(), EventError> {
        let mut reporter = ValidationErrorReporter::new();

        if events.is_empty() {
            reporter.report(ValidationErrorDetail::new(
                "events",
                ValidationCode::BatchEmpty,
                "at least one event is required",
            ));
        }

        if enforce_max && events.len() > self.config.max_batch_size {
            reporter.report(
                ValidationErrorDetail::new(
                    "events",
                    ValidationCode::BatchTooLarge,
                    "too many events for a single request; use send_batch",
                )
                .expected(format!("<= {} events", self.config.max_batch_size))
                .actual(format!("{} events", events.len())),
            );
        }

        for (index, event) in events.iter().enumerate() {
            self.validator.validate_into(event, &format!("events[{index}]"), &mut reporter);
        }

        let report = reporter.finish();
        if report.is_valid {
            return Ok(());
        }

        warn!(
            errors = report.errors.len(),
            summary = report.summary.as_deref().unwrap_or_default(),
            "events rejected by validation"
        );
        debug!("{}", report.detailed_report());
        Err(EventError::Validation { report })
    }

    fn prepare(&self, event: Event) -> Event {
        let mut event = self.validator.apply_transform(event);
        if event.ts.is_none() {
            event.ts = Some(self.clock.unix_millis());
        }
        event
    }

    async fn deliver(&self, events: Vec<Event>) -> Result<SendReceipt, EventError> {
        let event_count = events.len();
        let events = Arc::new(events);
        let options = RequestOptions { priority: self.config.priority, ..RequestOptions::default() };
        let span = info_span!("send_events", event_count);

        self.pool
            .execute_request(
                |attempt| {
                    let backend = Arc::clone(&self.backend);
                    let events = Arc::clone(&events);
                    async move {
                        debug!(attempt, "posting events");
                        backend.post_events(&events).await
                    }
                },
                options,
            )
            .instrument(span)
            .await
            .map_err(|e| e.into_event_error(event_count))
    }
}

#[async_trait]
impl EventSink for EventTransport {
    async fn send_events(&self, events: Vec<Event>) -> Result<SendReceipt, EventError> {
        self.send(events).await
    }
}
