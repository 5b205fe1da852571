//! Errors raised while talking to the platform.
//!
//! Every failure is classified for retry decisions, breaker accounting and
//! metrics. Transient failures are retried by the pool and only surface
//! once the policy is exhausted.

use std::{fmt, time::Duration};

use fngate_core::{BoxError, ErrorKind, EventError};
use thiserror::Error;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Low-level network failure classes, named after their errno codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkErrorKind {
    /// Peer reset the connection.
    ConnectionReset,
    /// Nothing listening on the target.
    ConnectionRefused,
    /// Connection or read timed out at the socket level.
    TimedOut,
    /// Host name does not resolve.
    NotFound,
    /// Resolver temporarily unavailable.
    DnsTemporary,
    /// Anything else (TLS handshake, protocol errors).
    Other,
}

impl NetworkErrorKind {
    /// Conventional error code.
    pub fn code(self) -> &'static str {
        match self {
            Self::ConnectionReset => "ECONNRESET",
            Self::ConnectionRefused => "ECONNREFUSED",
            Self::TimedOut => "ETIMEDOUT",
            Self::NotFound => "ENOTFOUND",
            Self::DnsTemporary => "EAI_AGAIN",
            Self::Other => "ENETWORK",
        }
    }

    /// Whether a later attempt may succeed.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Other)
    }
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Failures of a single outbound request or of the whole retry sequence.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Socket-level failure.
    #[error("network error ({kind}): {message}")]
    Network {
        /// Failure class
        kind: NetworkErrorKind,
        /// Error message from the HTTP stack
        message: String,
    },

    /// The attempt did not finish within its deadline.
    #[error("request timed out after {}ms", timeout.as_millis())]
    Timeout {
        /// Per-attempt deadline
        timeout: Duration,
    },

    /// The platform answered with a non-success status.
    #[error("platform responded with HTTP {status}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },

    /// The platform answered 429.
    #[error("rate limited by platform")]
    RateLimited {
        /// Delay requested through `Retry-After`
        retry_after: Option<Duration>,
    },

    /// The circuit breaker rejected the request.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// Every allowed attempt failed.
    #[error("request failed after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        /// Attempts made, including the first
        attempts: u32,
        /// Error of the final attempt
        #[source]
        last: Box<TransportError>,
    },

    /// The pool was closed while the request waited for a slot.
    #[error("connection pool closed")]
    PoolClosed,

    /// A success response could not be decoded.
    #[error("invalid platform response: {message}")]
    InvalidResponse {
        /// Decoder message
        message: String,
    },

    /// Client construction failed.
    #[error("transport configuration error: {message}")]
    Configuration {
        /// What went wrong
        message: String,
    },
}

impl TransportError {
    /// Creates a network error.
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self::Network { kind, message: message.into() }
    }

    /// Creates an HTTP status error.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http { status, body: body.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether another attempt may succeed.
    ///
    /// Retryable: `ECONNRESET`, `ECONNREFUSED`, `ETIMEDOUT`, `ENOTFOUND`,
    /// `EAI_AGAIN`, attempt timeouts, HTTP 5xx and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { kind, .. } => kind.is_retryable(),
            Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            Self::CircuitOpen
            | Self::RetriesExhausted { .. }
            | Self::PoolClosed
            | Self::InvalidResponse { .. }
            | Self::Configuration { .. } => false,
        }
    }

    /// Whether the error indicates the platform is unhealthy.
    ///
    /// Client errors other than 429 mean the platform answered, so they do
    /// not trip the breaker.
    pub fn counts_against_breaker(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500,
            Self::Network { .. } | Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::InvalidResponse { .. } => true,
            Self::CircuitOpen
            | Self::RetriesExhausted { .. }
            | Self::PoolClosed
            | Self::Configuration { .. } => false,
        }
    }

    /// Delay requested by the platform, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// The innermost attempt error.
    pub fn last_attempt(&self) -> &TransportError {
        match self {
            Self::RetriesExhausted { last, .. } => last.last_attempt(),
            other => other,
        }
    }

    /// Taxonomy kind.
    pub fn kind(&self) -> ErrorKind {
        match self.last_attempt() {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::CircuitOpen => ErrorKind::CircuitOpen,
            _ => ErrorKind::Event,
        }
    }

    /// Converts into the caller-facing send error.
    pub fn into_event_error(self, event_count: usize) -> EventError {
        let retryable = self.last_attempt().is_retryable() || matches!(self, Self::CircuitOpen);
        EventError::Delivery {
            event_count,
            message: self.to_string(),
            retryable,
            source: Some(Box::new(self) as BoxError),
        }
    }
}

/// Coarse error class for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Socket-level failures and timeouts.
    Network,
    /// HTTP 4xx other than 429.
    Client,
    /// HTTP 5xx.
    Server,
    /// HTTP 429.
    RateLimit,
    /// Breaker rejections.
    Circuit,
    /// Pool and client problems.
    Internal,
}

impl From<&TransportError> for ErrorCategory {
    fn from(error: &TransportError) -> Self {
        match error.last_attempt() {
            TransportError::Network { .. } | TransportError::Timeout { .. } => Self::Network,
            TransportError::Http { status, .. } if *status >= 500 => Self::Server,
            TransportError::Http { .. } | TransportError::InvalidResponse { .. } => Self::Client,
            TransportError::RateLimited { .. } => Self::RateLimit,
            TransportError::CircuitOpen => Self::Circuit,
            TransportError::RetriesExhausted { .. }
            | TransportError::PoolClosed
            | TransportError::Configuration { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Circuit => write!(f, "circuit"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        for kind in [
            NetworkErrorKind::ConnectionReset,
            NetworkErrorKind::ConnectionRefused,
            NetworkErrorKind::TimedOut,
            NetworkErrorKind::NotFound,
            NetworkErrorKind::DnsTemporary,
        ] {
            assert!(TransportError::network(kind, "x").is_retryable(), "{kind}");
        }
        assert!(TransportError::Timeout { timeout: Duration::from_secs(1) }.is_retryable());
        assert!(TransportError::http(503, "").is_retryable());
        assert!(TransportError::RateLimited { retry_after: None }.is_retryable());

        assert!(!TransportError::network(NetworkErrorKind::Other, "tls").is_retryable());
        assert!(!TransportError::http(400, "bad").is_retryable());
        assert!(!TransportError::http(401, "unauthorized").is_retryable());
        assert!(!TransportError::CircuitOpen.is_retryable());
        assert!(!TransportError::PoolClosed.is_retryable());
    }

    #[test]
    fn client_errors_do_not_trip_breaker() {
        assert!(!TransportError::http(404, "").counts_against_breaker());
        assert!(TransportError::http(500, "").counts_against_breaker());
        assert!(TransportError::RateLimited { retry_after: None }.counts_against_breaker());
    }

    #[test]
    fn exhausted_error_reports_last_attempt() {
        let error = TransportError::RetriesExhausted {
            attempts: 3,
            last: Box::new(TransportError::Timeout { timeout: Duration::from_millis(250) }),
        };

        assert_eq!(error.to_string(), "request failed after 3 attempt(s): request timed out after 250ms");
        assert_eq!(error.kind(), ErrorKind::Timeout);
        assert_eq!(ErrorCategory::from(&error), ErrorCategory::Network);

        let EventError::Delivery { retryable, event_count, .. } = error.into_event_error(4) else {
            panic!("expected delivery error");
        };
        assert!(retryable);
        assert_eq!(event_count, 4);
    }

    #[test]
    fn network_codes_match_errno_names() {
        assert_eq!(NetworkErrorKind::ConnectionReset.code(), "ECONNRESET");
        assert_eq!(NetworkErrorKind::DnsTemporary.to_string(), "EAI_AGAIN");
    }
}
