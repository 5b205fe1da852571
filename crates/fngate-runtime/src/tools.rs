//! Step-tool implementation backing [`Step`](fngate_core::Step).

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fngate_core::{
    Clock, Event, EventSink, SendReceipt, StepError, StepKind, StepOutcome, StepRecord, StepTools,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::duration::parse_duration;

#[derive(Debug, Default)]
struct Journal {
    records: Vec<StepRecord>,
    seen: HashSet<String>,
}

/// Per-invocation step tools with an in-memory journal.
///
/// Sleeps go through the injected [`Clock`]; `send_event` goes through the
/// configured [`EventSink`]. Primitives that need the durable-execution
/// server return [`StepError::NotSupported`].
pub struct InvocationStepTools {
    clock: Arc<dyn Clock>,
    sink: Option<Arc<dyn EventSink>>,
    journal: Mutex<Journal>,
}

impl std::fmt::Debug for InvocationStepTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationStepTools")
            .field("has_sink", &self.sink.is_some())
            .field("steps", &self.lock().records.len())
            .finish_non_exhaustive()
    }
}

impl InvocationStepTools {
    /// Creates tools for one invocation.
    pub fn new(clock: Arc<dyn Clock>, sink: Option<Arc<dyn EventSink>>) -> Self {
        Self { clock, sink, journal: Mutex::default() }
    }

    fn lock(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn sleep_step(&self, step_id: &str, duration: Duration) {
        let sequence = self.begin(step_id, StepKind::Sleep);
        info!(step_id, duration_ms = duration.as_millis() as u64, "step sleeping");
        self.clock.sleep(duration).await;
        self.finish(sequence, StepOutcome::Completed);
    }

    fn unsupported<T>(&self, step_id: &str, kind: StepKind, operation: &'static str) -> Result<T, StepError> {
        let sequence = self.begin(step_id, kind);
        let error = StepError::NotSupported { operation };
        warn!(step_id, operation, "step primitive requires the durable-execution server");
        self.finish(sequence, StepOutcome::Failed(error.to_string()));
        Err(error)
    }
}

#[async_trait]
impl StepTools for InvocationStepTools {
    fn begin(&self, step_id: &str, kind: StepKind) -> u64 {
        let mut journal = self.lock();
        if !journal.seen.insert(step_id.to_string()) {
            warn!(step_id, "step id reused within one invocation");
        }
        let sequence = journal.records.len() as u64;
        journal.records.push(StepRecord {
            sequence,
            step_id: step_id.to_string(),
            kind,
            outcome: StepOutcome::Pending,
        });
        sequence
    }

    fn finish(&self, sequence: u64, outcome: StepOutcome) {
        let mut journal = self.lock();
        if let Some(record) = usize::try_from(sequence).ok().and_then(|i| journal.records.get_mut(i)) {
            record.outcome = outcome;
        }
    }

    fn journal(&self) -> Vec<StepRecord> {
        self.lock().records.clone()
    }

    async fn sleep(&self, step_id: &str, duration: &str) -> Result<(), StepError> {
        match parse_duration(duration) {
            Ok(parsed) => {
                self.sleep_step(step_id, parsed).await;
                Ok(())
            },
            Err(e) => {
                let sequence = self.begin(step_id, StepKind::Sleep);
                self.finish(sequence, StepOutcome::Failed(e.to_string()));
                Err(e)
            },
        }
    }

    async fn sleep_for(&self, step_id: &str, duration: Duration) -> Result<(), StepError> {
        self.sleep_step(step_id, duration).await;
        Ok(())
    }

    async fn sleep_until(&self, step_id: &str, until: DateTime<Utc>) -> Result<(), StepError> {
        let remaining = (until - self.clock.now_utc()).to_std().unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            debug!(step_id, %until, "sleep target already passed");
        }
        self.sleep_step(step_id, remaining).await;
        Ok(())
    }

    async fn send_event(&self, step_id: &str, events: Vec<Event>) -> Result<SendReceipt, StepError> {
        let sequence = self.begin(step_id, StepKind::SendEvent);

        let Some(sink) = &self.sink else {
            let error = StepError::NoEventSink { step_id: step_id.to_string() };
            self.finish(sequence, StepOutcome::Failed(error.to_string()));
            return Err(error);
        };

        let count = events.len();
        match sink.send_events(events).await {
            Ok(receipt) => {
                info!(step_id, count, "step sent events");
                self.finish(sequence, StepOutcome::Completed);
                Ok(receipt)
            },
            Err(source) => {
                warn!(step_id, count, error = %source, "step failed to send events");
                self.finish(sequence, StepOutcome::Failed(source.to_string()));
                Err(StepError::SendFailed { step_id: step_id.to_string(), source })
            },
        }
    }

    async fn wait_for_event(
        &self,
        step_id: &str,
        _event: &str,
        _timeout: &str,
    ) -> Result<Option<Event>, StepError> {
        self.unsupported(step_id, StepKind::WaitForEvent, "wait_for_event")
    }

    async fn invoke(&self, step_id: &str, _function_id: &str, _data: Value) -> Result<Value, StepError> {
        self.unsupported(step_id, StepKind::Invoke, "invoke")
    }

    async fn ai_infer(&self, step_id: &str, _request: Value) -> Result<Value, StepError> {
        self.unsupported(step_id, StepKind::AiInfer, "ai_infer")
    }
}
