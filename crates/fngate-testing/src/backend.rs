//! In-memory event destinations.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use fngate_core::{Event, EventError, EventSink, SendReceipt};
use fngate_transport::{client::EventBackend, error::Result, TransportError};

#[derive(Default)]
struct Script {
    responses: VecDeque<Result<SendReceipt>>,
    calls: Vec<Vec<Event>>,
}

/// [`EventBackend`] that replays scripted outcomes, then succeeds.
///
/// Every call is recorded, including failed ones. Successful calls without
/// a scripted receipt return ids `evt-<n>` for each event.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    /// Backend that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `error` for the next unscripted call.
    #[must_use]
    pub fn then_fail(self, error: TransportError) -> Self {
        self.lock().responses.push_back(Err(error));
        self
    }

    /// Queues `count` copies of `error`.
    #[must_use]
    pub fn then_fail_times(self, count: usize, error: TransportError) -> Self {
        (0..count).fold(self, |backend, _| backend.then_fail(error.clone()))
    }

    /// Queues a successful receipt.
    #[must_use]
    pub fn then_succeed(self, receipt: SendReceipt) -> Self {
        self.lock().responses.push_back(Ok(receipt));
        self
    }

    /// Sleeps (on the tokio clock) before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls made.
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Events received by each call, in call order.
    pub fn calls(&self) -> Vec<Vec<Event>> {
        self.lock().calls.clone()
    }

    /// Every event received, flattened in call order.
    pub fn events(&self) -> Vec<Event> {
        self.lock().calls.iter().flatten().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventBackend for ScriptedBackend {
    async fn post_events(&self, events: &[Event]) -> Result<SendReceipt> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.lock();
        script.calls.push(events.to_vec());
        let call = script.calls.len();
        script.responses.pop_front().unwrap_or_else(|| {
            Ok(SendReceipt {
                ids: (0..events.len()).map(|i| format!("evt-{call}-{i}")).collect(),
                status: 200,
            })
        })
    }
}

/// [`EventSink`] that records what handlers send.
#[derive(Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<Event>>>,
}

impl RecordingSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far.
    pub fn events(&self) -> Vec<Event> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send_events(&self, events: Vec<Event>) -> std::result::Result<SendReceipt, EventError> {
        let ids = events.iter().map(|e| format!("sink-{}", e.name)).collect();
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).extend(events);
        Ok(SendReceipt { ids, status: 200 })
    }
}
