//! Event, invocation and transport fixtures.

use std::sync::Arc;

use fngate_core::{Clock, Event, EventUser};
use fngate_transport::{
    client::EventBackend, CircuitConfig, ConnectionPool, EventTransport, PoolConfig, RetryPolicy,
    TransportConfig,
};
use serde_json::{json, Value};

/// `user.created` for user `u1`.
pub fn user_created() -> Event {
    Event::new("user.created")
        .with_data(json!({"userId": "u1"}))
        .with_user(EventUser::new("u1").with_email("u1@example.com"))
}

/// Builder for webhook invocation bodies.
#[derive(Debug, Clone)]
pub struct InvocationBuilder {
    function_id: String,
    event: Value,
    run_id: String,
    attempt: u32,
}

impl InvocationBuilder {
    /// Invocation of `function_id` with [`user_created`] as its event.
    pub fn new(function_id: impl Into<String>) -> Self {
        Self {
            function_id: function_id.into(),
            event: json!({"name": "user.created", "data": {"userId": "u1"}}),
            run_id: "01HRUN0000000000000000000".to_string(),
            attempt: 0,
        }
    }

    /// Replaces the event.
    #[must_use]
    pub fn event(mut self, event: &Event) -> Self {
        self.event = json!(event);
        self
    }

    /// Replaces the event with raw JSON.
    #[must_use]
    pub fn raw_event(mut self, event: Value) -> Self {
        self.event = event;
        self
    }

    /// Sets the run id.
    #[must_use]
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Sets the attempt number.
    #[must_use]
    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// JSON body.
    pub fn build(&self) -> Value {
        json!({
            "function_id": self.function_id,
            "event": self.event,
            "run_id": self.run_id,
            "attempt": self.attempt,
        })
    }

    /// Serialized body bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.build().to_string().into_bytes()
    }
}

/// An [`EventTransport`] over `backend` with an event key configured.
///
/// # Panics
///
/// Panics if the pool cannot build its HTTP agents.
pub fn test_transport(
    backend: Arc<dyn EventBackend>,
    clock: Arc<dyn Clock>,
    config: TransportConfig,
    retry: RetryPolicy,
    circuit: CircuitConfig,
) -> EventTransport {
    let config = TransportConfig {
        event_key: config.event_key.or_else(|| Some("test-event-key".to_string())),
        ..config
    };
    let pool = ConnectionPool::new(PoolConfig::default(), retry, circuit, Arc::clone(&clock))
        .expect("test pool builds");
    EventTransport::new(config, Arc::new(pool), backend, clock)
}
