//! Bounded, prioritised, retrying executor for platform requests.
//!
//! [`ConnectionPool`] owns the two HTTP agents (plain and TLS), caps the
//! number of in-flight attempts, queues the excess by priority, applies the
//! per-attempt timeout, retries transient failures with backoff and feeds
//! outcomes to the circuit breaker.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering as AtomicOrdering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use fngate_core::Clock;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    circuit::{CircuitBreaker, CircuitConfig, CircuitSnapshot, CircuitState},
    error::{Result, TransportError},
    retry::RetryPolicy,
};

/// Pool sizing and HTTP agent settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum attempts in flight across both agents.
    pub max_concurrent: usize,
    /// Default per-attempt timeout.
    pub request_timeout: Duration,
    /// Idle keep-alive connections kept per host.
    pub max_idle_per_host: usize,
    /// How long an idle connection is kept.
    pub idle_timeout: Duration,
    /// TCP keep-alive interval.
    pub tcp_keepalive: Duration,
    /// `user-agent` header.
    pub user_agent: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            request_timeout: Duration::from_secs(30),
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Duration::from_secs(60),
            user_agent: format!("fngate/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Per-call knobs for [`ConnectionPool::execute_request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    /// Per-attempt timeout; pool default when `None`.
    pub timeout: Option<Duration>,
    /// Additional attempts; policy default when `None`.
    pub retries: Option<u32>,
    /// Higher values leave the queue first.
    pub priority: i32,
    /// Whether the breaker gates this request.
    pub circuit_breaker: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self { timeout: None, retries: None, priority: 0, circuit_breaker: true }
    }
}

/// The plain and TLS HTTP agents.
#[derive(Debug, Clone)]
pub struct Agents {
    plain: reqwest::Client,
    tls: reqwest::Client,
}

impl Agents {
    /// Builds both agents with keep-alive and idle limits from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if a client cannot be built.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        let builder = || {
            reqwest::Client::builder()
                .user_agent(&config.user_agent)
                .pool_max_idle_per_host(config.max_idle_per_host)
                .pool_idle_timeout(config.idle_timeout)
                .tcp_keepalive(config.tcp_keepalive)
        };

        let plain = builder()
            .build()
            .map_err(|e| TransportError::configuration(format!("failed to build HTTP agent: {e}")))?;
        let tls = builder()
            .https_only(true)
            .build()
            .map_err(|e| TransportError::configuration(format!("failed to build HTTPS agent: {e}")))?;

        Ok(Self { plain, tls })
    }

    /// Agent matching the scheme of `url`.
    pub fn for_url(&self, url: &str) -> &reqwest::Client {
        if url.starts_with("https://") {
            &self.tls
        } else {
            &self.plain
        }
    }
}

/// Pool counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetrics {
    /// Attempts started.
    pub total_requests: u64,
    /// Attempts that failed.
    pub total_errors: u64,
    /// Calls refused by the open breaker before any attempt started.
    pub circuit_rejections: u64,
    /// `total_errors / total_requests`, 0 when idle.
    pub error_rate: f64,
    /// Breaker failure streak.
    pub consecutive_failures: u32,
    /// Breaker state.
    pub circuit_state: CircuitState,
    /// Attempts currently holding a slot.
    pub active_requests: usize,
    /// Callers waiting for a slot.
    pub queued_requests: usize,
}

struct Waiter {
    priority: i32,
    seq: u64,
    tx: oneshot::Sender<SlotGuard>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // Max-heap: higher priority first, then lower sequence (FIFO).
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct SlotState {
    active: usize,
    queue: BinaryHeap<Waiter>,
    next_seq: u64,
    closed: bool,
}

struct Slots {
    max: usize,
    state: Mutex<SlotState>,
}

impl Slots {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(self: &Arc<Self>) {
        let mut state = self.lock();
        while let Some(waiter) = state.queue.pop() {
            if waiter.tx.is_closed() {
                continue;
            }
            let guard = SlotGuard { slots: Arc::clone(self), armed: true };
            match waiter.tx.send(guard) {
                Ok(()) => return,
                Err(mut guard) => guard.armed = false,
            }
        }
        state.active = state.active.saturating_sub(1);
    }
}

/// A held concurrency slot; released or handed to the next waiter on drop.
struct SlotGuard {
    slots: Arc<Slots>,
    armed: bool,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.armed {
            self.slots.release();
        }
    }
}

/// Shared executor for platform requests.
pub struct ConnectionPool {
    config: PoolConfig,
    retry: RetryPolicy,
    agents: Agents,
    breaker: CircuitBreaker,
    clock: Arc<dyn Clock>,
    slots: Arc<Slots>,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    circuit_rejections: AtomicU64,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .field("metrics", &self.metrics())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Creates a pool with its agents and breaker.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if an agent cannot be built.
    pub fn new(
        config: PoolConfig,
        retry: RetryPolicy,
        circuit: CircuitConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let agents = Agents::new(&config)?;
        let slots = Arc::new(Slots { max: config.max_concurrent.max(1), state: Mutex::default() });

        Ok(Self {
            breaker: CircuitBreaker::new(circuit, Arc::clone(&clock)),
            config,
            retry,
            agents,
            clock,
            slots,
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            circuit_rejections: AtomicU64::new(0),
        })
    }

    /// HTTP agents for building requests.
    pub fn agents(&self) -> &Agents {
        &self.agents
    }

    /// The breaker.
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Default retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Closes the breaker. Operational recovery hook.
    pub fn force_close_circuit(&self) {
        self.breaker.force_close();
    }

    /// Rejects every queued and future request with [`TransportError::PoolClosed`].
    ///
    /// In-flight attempts run to completion.
    pub fn close(&self) {
        let waiters = {
            let mut state = self.slots.lock();
            state.closed = true;
            std::mem::take(&mut state.queue)
        };
        debug!(rejected = waiters.len(), "connection pool closed");
        drop(waiters);
    }

    /// Snapshot of the counters.
    pub fn metrics(&self) -> PoolMetrics {
        let total_requests = self.total_requests.load(AtomicOrdering::Relaxed);
        let total_errors = self.total_errors.load(AtomicOrdering::Relaxed);
        let CircuitSnapshot { state, consecutive_failures, .. } = self.breaker.snapshot();
        let (active_requests, queued_requests) = {
            let slots = self.slots.lock();
            (slots.active, slots.queue.len())
        };

        PoolMetrics {
            total_requests,
            total_errors,
            circuit_rejections: self.circuit_rejections.load(AtomicOrdering::Relaxed),
            error_rate: if total_requests == 0 {
                0.0
            } else {
                total_errors as f64 / total_requests as f64
            },
            consecutive_failures,
            circuit_state: state,
            active_requests,
            queued_requests,
        }
    }

    async fn acquire_slot(&self, priority: i32) -> Result<SlotGuard> {
        let rx = {
            let mut state = self.slots.lock();
            if state.closed {
                return Err(TransportError::PoolClosed);
            }
            if state.active < self.slots.max && state.queue.is_empty() {
                state.active += 1;
                return Ok(SlotGuard { slots: Arc::clone(&self.slots), armed: true });
            }

            let (tx, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(Waiter { priority, seq, tx });
            rx
        };

        rx.await.map_err(|_| TransportError::PoolClosed)
    }

    /// Runs `request_fn` under the pool's concurrency, timeout, retry and
    /// breaker rules.
    ///
    /// `request_fn` receives the zero-based attempt number and is called
    /// once per attempt. A concurrency slot is held only while an attempt
    /// runs, not during backoff.
    ///
    /// # Errors
    ///
    /// - [`TransportError::CircuitOpen`] if the breaker rejects an attempt
    /// - [`TransportError::PoolClosed`] if the pool is closed
    /// - the attempt's own error when it is not retryable
    /// - [`TransportError::RetriesExhausted`] when every attempt failed
    pub async fn execute_request<T, F, Fut>(&self, mut request_fn: F, options: RequestOptions) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = options.timeout.unwrap_or(self.config.request_timeout);
        let retries = options.retries.unwrap_or_else(|| self.retry.retries());
        let mut attempt = 0;

        loop {
            let permit = if options.circuit_breaker {
                match self.breaker.try_acquire() {
                    Ok(permit) => Some(permit),
                    Err(e) => {
                        self.circuit_rejections.fetch_add(1, AtomicOrdering::Relaxed);
                        debug!(attempt, "request rejected by open circuit breaker");
                        return Err(e);
                    },
                }
            } else {
                None
            };

            let slot = self.acquire_slot(options.priority).await?;
            self.total_requests.fetch_add(1, AtomicOrdering::Relaxed);

            let outcome = match tokio::time::timeout(timeout, request_fn(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout { timeout }),
            };
            drop(slot);

            let error = match outcome {
                Ok(value) => {
                    if let Some(permit) = permit {
                        permit.success();
                    }
                    return Ok(value);
                },
                Err(error) => error,
            };

            self.total_errors.fetch_add(1, AtomicOrdering::Relaxed);
            if let Some(permit) = permit {
                if error.counts_against_breaker() {
                    permit.failure();
                } else {
                    permit.success();
                }
            }

            if !error.is_retryable() {
                debug!(attempt, error = %error, "non-retryable request failure");
                return Err(error);
            }

            if attempt >= retries {
                warn!(attempts = attempt + 1, error = %error, "request retries exhausted");
                return Err(TransportError::RetriesExhausted {
                    attempts: attempt + 1,
                    last: Box::new(error),
                });
            }

            let delay = self.retry.delay_after(attempt, &error);
            warn!(
                attempt = attempt + 1,
                max_attempts = retries + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "request failed, retrying"
            );
            self.clock.sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use fngate_core::TestClock;

    use super::*;
    use crate::error::NetworkErrorKind;

    fn pool(max_concurrent: usize, clock: &TestClock) -> Arc<ConnectionPool> {
        Arc::new(
            ConnectionPool::new(
                PoolConfig { max_concurrent, ..PoolConfig::default() },
                RetryPolicy::default(),
                CircuitConfig { failure_threshold: 3, reset_timeout: Duration::from_secs(10) },
                Arc::new(clock.clone()),
            )
            .unwrap(),
        )
    }

    fn reset() -> TransportError {
        TransportError::network(NetworkErrorKind::ConnectionReset, "connection reset by peer")
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let clock = TestClock::new();
        let pool = pool(4, &clock);
        let calls = AtomicU32::new(0);

        let value = pool
            .execute_request(
                |_| {
                    let n = calls.fetch_add(1, AtomicOrdering::SeqCst);
                    async move { if n < 2 { Err(reset()) } else { Ok("done") } }
                },
                RequestOptions { retries: Some(2), ..RequestOptions::default() },
            )
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 3);
        assert!(clock.total_slept() >= Duration::from_secs(3), "slept {:?}", clock.total_slept());
        assert_eq!(pool.metrics().total_requests, 3);
        assert_eq!(pool.metrics().total_errors, 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_are_returned_immediately() {
        let clock = TestClock::new();
        let pool = pool(4, &clock);
        let calls = AtomicU32::new(0);

        let error = pool
            .execute_request(
                |_| {
                    calls.fetch_add(1, AtomicOrdering::SeqCst);
                    async { Err::<(), _>(TransportError::http(400, "bad event")) }
                },
                RequestOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(error, TransportError::Http { status: 400, .. }));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(pool.metrics().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_wrap_the_last_error() {
        let clock = TestClock::new();
        let pool = pool(4, &clock);

        let error = pool
            .execute_request(
                |_| async { Err::<(), _>(reset()) },
                RequestOptions { retries: Some(1), ..RequestOptions::default() },
            )
            .await
            .unwrap_err();

        assert!(matches!(error, TransportError::RetriesExhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn attempt_timeout_is_enforced() {
        let clock = TestClock::new();
        let pool = pool(4, &clock);

        let error = pool
            .execute_request(
                |_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                },
                RequestOptions {
                    timeout: Some(Duration::from_millis(20)),
                    retries: Some(0),
                    ..RequestOptions::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(
            error.last_attempt(),
            TransportError::Timeout { timeout } if *timeout == Duration::from_millis(20)
        ));
    }

    #[tokio::test]
    async fn open_breaker_skips_request_fn() {
        let clock = TestClock::new();
        let pool = pool(4, &clock);
        let calls = AtomicU32::new(0);
        let failing = RequestOptions { retries: Some(0), ..RequestOptions::default() };

        for _ in 0..3 {
            let _ = pool
                .execute_request(
                    |_| {
                        calls.fetch_add(1, AtomicOrdering::SeqCst);
                        async { Err::<(), _>(TransportError::http(503, "")) }
                    },
                    failing,
                )
                .await;
        }
        assert_eq!(pool.metrics().circuit_state, CircuitState::Open);

        let error = pool
            .execute_request(
                |_| {
                    calls.fetch_add(1, AtomicOrdering::SeqCst);
                    async { Ok(()) }
                },
                failing,
            )
            .await
            .unwrap_err();

        assert!(matches!(error, TransportError::CircuitOpen));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 3);

        clock.advance(Duration::from_secs(10));
        pool.execute_request(|_| async { Ok(()) }, failing).await.unwrap();
        assert_eq!(pool.metrics().circuit_state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn backoff_between_attempts_follows_the_policy() {
        let clock = TestClock::new();
        let pool = ConnectionPool::new(
            PoolConfig::default(),
            RetryPolicy { max_attempts: 3, jitter_factor: 0.0, ..RetryPolicy::default() },
            CircuitConfig { failure_threshold: 10, reset_timeout: Duration::from_secs(10) },
            Arc::new(clock.clone()),
        )
        .unwrap();

        let error = pool
            .execute_request(|_| async { Err::<(), _>(reset()) }, RequestOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(error, TransportError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(clock.total_slept(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn zero_retries_makes_a_single_attempt() {
        let clock = TestClock::new();
        let pool = pool(4, &clock);
        let attempts = Arc::new(Mutex::new(Vec::new()));

        let error = pool
            .execute_request(
                |attempt| {
                    attempts.lock().unwrap().push(attempt);
                    async { Err::<(), _>(reset()) }
                },
                RequestOptions { retries: Some(0), ..RequestOptions::default() },
            )
            .await
            .unwrap_err();

        assert!(matches!(error, TransportError::RetriesExhausted { attempts: 1, .. }));
        assert_eq!(*attempts.lock().unwrap(), [0]);
        assert_eq!(clock.total_slept(), Duration::ZERO);
    }

    #[tokio::test]
    async fn breaker_rejections_stay_out_of_the_error_rate() {
        let clock = TestClock::new();
        let pool = pool(4, &clock);
        let failing = RequestOptions { retries: Some(0), ..RequestOptions::default() };

        for _ in 0..12 {
            let _ = pool
                .execute_request(|_| async { Err::<(), _>(TransportError::http(503, "")) }, failing)
                .await;
        }

        let metrics = pool.metrics();
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.total_errors, 3);
        assert_eq!(metrics.circuit_rejections, 9);
        assert!(metrics.error_rate <= 1.0, "error rate {}", metrics.error_rate);
    }

    #[tokio::test]
    async fn queued_requests_drain_by_priority() {
        let clock = TestClock::new();
        let pool = pool(1, &clock);
        let order = Arc::new(Mutex::new(Vec::new()));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let blocker = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let mut release_rx = Some(release_rx);
                pool.execute_request(
                    move |_| {
                        let rx = release_rx.take();
                        async move {
                            if let Some(rx) = rx {
                                let _ = rx.await;
                            }
                            Ok(())
                        }
                    },
                    RequestOptions::default(),
                )
                .await
            })
        };
        while pool.metrics().active_requests == 0 {
            tokio::task::yield_now().await;
        }

        let mut waiters = Vec::new();
        for (label, priority) in [("low", 0), ("high", 10), ("low-2", 0), ("mid", 5)] {
            let task_pool = Arc::clone(&pool);
            let order = Arc::clone(&order);
            waiters.push(tokio::spawn(async move {
                task_pool.execute_request(
                    move |_| {
                        order.lock().unwrap().push(label);
                        async { Ok(()) }
                    },
                    RequestOptions { priority, ..RequestOptions::default() },
                )
                .await
            }));
            while pool_queue_len(&pool) < waiters.len() {
                tokio::task::yield_now().await;
            }
        }

        release_tx.send(()).unwrap();
        blocker.await.unwrap().unwrap();
        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), ["high", "mid", "low", "low-2"]);
        assert_eq!(pool.metrics().active_requests, 0);
    }

    fn pool_queue_len(pool: &ConnectionPool) -> usize {
        pool.metrics().queued_requests
    }

    #[tokio::test]
    async fn close_rejects_queued_waiters() {
        let clock = TestClock::new();
        let pool = pool(1, &clock);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let blocker = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let mut release_rx = Some(release_rx);
                pool.execute_request(
                    move |_| {
                        let rx = release_rx.take();
                        async move {
                            if let Some(rx) = rx {
                                let _ = rx.await;
                            }
                            Ok(())
                        }
                    },
                    RequestOptions::default(),
                )
                .await
            })
        };
        while pool.metrics().active_requests == 0 {
            tokio::task::yield_now().await;
        }

        let queued = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.execute_request(|_| async { Ok(()) }, RequestOptions::default()).await
            })
        };
        while pool.metrics().queued_requests == 0 {
            tokio::task::yield_now().await;
        }

        pool.close();

        assert!(matches!(queued.await.unwrap(), Err(TransportError::PoolClosed)));
        release_tx.send(()).unwrap();
        blocker.await.unwrap().unwrap();
        assert!(matches!(
            pool.execute_request(|_| async { Ok(()) }, RequestOptions::default()).await,
            Err(TransportError::PoolClosed)
        ));
    }
}
