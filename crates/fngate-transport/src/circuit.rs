//! Circuit breaker guarding the platform event API.
//!
//! ```text
//!   Closed ──(failure_threshold consecutive failures)──▶ Open
//!     ▲                                                   │
//!     │ probe succeeds                  reset_timeout since last failure
//!     │                                                   ▼
//!     └──────────────────────────────────────────────  HalfOpen
//!                       probe fails ──▶ Open
//! ```
//!
//! While open, requests are rejected before any I/O. After `reset_timeout`
//! has passed since the last failure, exactly one probe request is let
//! through; its outcome closes or reopens the breaker.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use fngate_core::Clock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::TransportError;

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Time since the last failure before a probe is allowed.
    pub reset_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout: Duration::from_secs(60) }
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected.
    Open,
    /// One probe request is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Time since the most recent failure.
    pub since_last_failure: Option<Duration>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Asks permission to send a request.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::CircuitOpen`] while open, or while half
    /// open with a probe already in flight.
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>, TransportError> {
        let mut state = self.lock();

        if state.state == CircuitState::Open {
            let elapsed = state
                .last_failure
                .map_or(Duration::MAX, |at| self.clock.now().saturating_duration_since(at));
            if elapsed >= self.config.reset_timeout {
                info!(elapsed_ms = elapsed.as_millis() as u64, "circuit breaker half-open, sending probe");
                state.state = CircuitState::HalfOpen;
                state.probe_in_flight = false;
            }
        }

        match state.state {
            CircuitState::Closed => Ok(CircuitPermit { breaker: self, probe: false, settled: false }),
            CircuitState::HalfOpen if !state.probe_in_flight => {
                state.probe_in_flight = true;
                Ok(CircuitPermit { breaker: self, probe: true, settled: false })
            },
            CircuitState::HalfOpen | CircuitState::Open => Err(TransportError::CircuitOpen),
        }
    }

    /// Records a success.
    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.state != CircuitState::Closed {
            info!(previous = %state.state, "circuit breaker closed");
        }
        state.state = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.probe_in_flight = false;
    }

    /// Records a failure.
    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = Some(self.clock.now());

        match state.state {
            CircuitState::Closed if state.consecutive_failures >= self.config.failure_threshold => {
                warn!(
                    consecutive_failures = state.consecutive_failures,
                    "circuit breaker opened"
                );
                state.state = CircuitState::Open;
            },
            CircuitState::HalfOpen => {
                warn!("circuit breaker probe failed, reopening");
                state.state = CircuitState::Open;
                state.probe_in_flight = false;
            },
            CircuitState::Closed | CircuitState::Open => {},
        }
    }

    /// Closes the breaker and clears the failure count.
    pub fn force_close(&self) {
        let mut state = self.lock();
        info!(previous = %state.state, "circuit breaker force-closed");
        state.state = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.last_failure = None;
        state.probe_in_flight = false;
    }

    /// Current state, without triggering the half-open transition.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Current counters.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.lock();
        CircuitSnapshot {
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            since_last_failure: state
                .last_failure
                .map(|at| self.clock.now().saturating_duration_since(at)),
        }
    }

    /// Configured thresholds.
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }
}

/// Permission to send one request.
///
/// Dropping an unsettled probe permit lets the next caller probe instead.
#[derive(Debug)]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl CircuitPermit<'_> {
    /// Whether this request is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Reports a successful request.
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    /// Reports a failed request.
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}
