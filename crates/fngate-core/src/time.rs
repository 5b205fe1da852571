//! Injectable time source.
//!
//! Signature tolerance checks, circuit breaker timing, retry backoff and
//! step sleeps all read time through [`Clock`] so tests can drive them
//! without waiting on the wall clock.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};

/// Source of monotonic time, wall time and sleeps.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant for measuring elapsed time.
    fn now(&self) -> Instant;

    /// Wall-clock time for timestamps.
    fn now_system(&self) -> SystemTime;

    /// Suspends for `duration`.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Wall-clock time as whole unix seconds.
    fn unix_seconds(&self) -> i64 {
        let secs = self.now_system().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        i64::try_from(secs).unwrap_or(i64::MAX)
    }

    /// Wall-clock time as unix milliseconds.
    fn unix_millis(&self) -> i64 {
        let millis = self.now_system().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        i64::try_from(millis).unwrap_or(i64::MAX)
    }

    /// Wall-clock time as a UTC datetime.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }
}

/// Production clock backed by the OS and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually driven clock for tests.
///
/// `sleep` advances the clock by the requested duration and yields once,
/// so backoff loops complete instantly while still observing elapsed time.
#[derive(Debug, Clone)]
pub struct TestClock {
    monotonic_ns: Arc<AtomicU64>,
    system_ns: Arc<AtomicU64>,
    slept_ns: Arc<AtomicU64>,
    base_instant: Instant,
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl TestClock {
    /// Creates a clock starting at the current wall time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a clock starting at `start`.
    pub fn with_start_time(start: SystemTime) -> Self {
        let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            monotonic_ns: Arc::new(AtomicU64::new(0)),
            system_ns: Arc::new(AtomicU64::new(saturating_nanos(since_epoch))),
            slept_ns: Arc::new(AtomicU64::new(0)),
            base_instant: Instant::now(),
        }
    }

    /// Creates a clock starting at the given unix second.
    pub fn at_unix_seconds(secs: u64) -> Self {
        Self::with_start_time(UNIX_EPOCH + Duration::from_secs(secs))
    }

    /// Advances monotonic and wall time together.
    pub fn advance(&self, duration: Duration) {
        let ns = saturating_nanos(duration);
        self.monotonic_ns.fetch_add(ns, Ordering::AcqRel);
        self.system_ns.fetch_add(ns, Ordering::AcqRel);
    }

    /// Elapsed monotonic time since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.monotonic_ns.load(Ordering::Acquire))
    }

    /// Total time requested through [`Clock::sleep`].
    pub fn total_slept(&self) -> Duration {
        Duration::from_nanos(self.slept_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.system_ns.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.slept_ns.fetch_add(saturating_nanos(duration), Ordering::AcqRel);
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_both_clocks() {
        let clock = TestClock::at_unix_seconds(1_000);
        let start = clock.now();

        clock.advance(Duration::from_secs(60));

        assert_eq!(clock.now().duration_since(start), Duration::from_secs(60));
        assert_eq!(clock.unix_seconds(), 1_060);
        assert_eq!(clock.unix_millis(), 1_060_000);
    }

    #[tokio::test]
    async fn sleep_advances_without_waiting() {
        let clock = TestClock::new();

        clock.sleep(Duration::from_secs(3600)).await;

        assert_eq!(clock.elapsed(), Duration::from_secs(3600));
        assert_eq!(clock.total_slept(), Duration::from_secs(3600));
    }

    #[test]
    fn now_utc_matches_system_time() {
        let clock = TestClock::at_unix_seconds(1_700_000_000);
        assert_eq!(clock.now_utc().timestamp(), 1_700_000_000);
    }
}
