//! Outbound path to the platform event API.
//!
//! [`EventTransport`] validates and batches events, then sends each request
//! through the [`ConnectionPool`], which bounds concurrency, applies
//! per-attempt timeouts, retries transient failures with jittered backoff
//! and trips a [`CircuitBreaker`] when the platform keeps failing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit;
pub mod client;
pub mod error;
pub mod pool;
pub mod retry;
pub mod sender;

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitSnapshot, CircuitState};
pub use client::{EventBackend, PlatformClient, PlatformConfig, DEFAULT_BASE_URL};
pub use error::{ErrorCategory, NetworkErrorKind, TransportError};
pub use pool::{Agents, ConnectionPool, PoolConfig, PoolMetrics, RequestOptions};
pub use retry::RetryPolicy;
pub use sender::{BatchReport, ChunkReport, EventTransport, TransportConfig};
