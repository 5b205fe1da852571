//! Error taxonomy shared by every gateway crate.
//!
//! Each failure family maps onto an [`ErrorKind`] which carries a stable,
//! machine-readable code. Startup errors (`Config`, `Function`) are fatal;
//! `Event` errors are recoverable by the caller that attempted a send.

use std::fmt;

use thiserror::Error;

use crate::validation::ValidationResult;

/// Boxed error used for handler failures and opaque transport causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level classification of gateway failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad static configuration, fatal at startup.
    Config,
    /// Bad or duplicate function registration, fatal at startup.
    Function,
    /// Outbound validation or send failure.
    Event,
    /// Inbound protocol or authentication failure.
    Webhook,
    /// Handler execution failure.
    Runtime,
    /// Outbound attempt exceeded its deadline.
    Timeout,
    /// Outbound request rejected by an open circuit breaker.
    CircuitOpen,
}

impl ErrorKind {
    /// Stable machine-readable code for this kind.
    pub fn code(self) -> &'static str {
        match self {
            Self::Config => "CONFIG_ERROR",
            Self::Function => "FUNCTION_ERROR",
            Self::Event => "EVENT_ERROR",
            Self::Webhook => "WEBHOOK_ERROR",
            Self::Runtime => "RUNTIME_ERROR",
            Self::Timeout => "TIMEOUT_ERROR",
            Self::CircuitOpen => "CIRCUIT_BREAKER_OPEN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Invalid static configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value failed validation.
    #[error("invalid configuration for `{field}`: {message}")]
    Invalid {
        /// Name of the offending field
        field: &'static str,
        /// Why the value was rejected
        message: String,
    },

    /// Configuration sources could not be read or merged.
    #[error("failed to load configuration: {message}")]
    Load {
        /// Loader error message
        message: String,
    },
}

impl ConfigError {
    /// Creates a validation error for a named field.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid { field, message: message.into() }
    }

    /// Taxonomy kind.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }
}

/// Function registration and discovery failures.
#[derive(Debug, Error)]
pub enum FunctionError {
    /// A function with this id is already registered.
    #[error("duplicate function id `{id}`")]
    DuplicateFunctionId {
        /// The colliding id
        id: String,
    },

    /// The provider could not bind the declared method to a handler.
    #[error("invalid handler `{method}` on provider `{provider}`: not callable")]
    InvalidHandler {
        /// Provider that declared the function
        provider: String,
        /// Method name that failed to bind
        method: String,
    },

    /// The function configuration is malformed.
    #[error("invalid config for function `{id}`: {message}")]
    InvalidConfig {
        /// Function id as declared
        id: String,
        /// What is wrong with it
        message: String,
    },

    /// One or more providers failed during best-effort discovery.
    #[error("function discovery failed for {} registration(s)", failures.len())]
    Discovery {
        /// Every failure observed during the pass
        failures: Vec<DiscoveryFailure>,
    },
}

impl FunctionError {
    /// Creates an invalid-config error.
    pub fn invalid_config(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig { id: id.into(), message: message.into() }
    }

    /// Taxonomy kind.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Function
    }

    /// Fine-grained machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateFunctionId { .. } => "DUPLICATE_FUNCTION_ID",
            Self::InvalidHandler { .. } => "INVALID_HANDLER",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::Discovery { .. } => "DISCOVERY_FAILED",
        }
    }
}

/// A single failed registration observed during discovery.
#[derive(Debug)]
pub struct DiscoveryFailure {
    /// Provider being scanned
    pub provider: String,
    /// Method being registered
    pub method: String,
    /// Underlying registration error
    pub error: Box<FunctionError>,
}

impl fmt::Display for DiscoveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}: {}", self.provider, self.method, self.error)
    }
}

/// Outbound event validation and send failures.
#[derive(Debug, Error)]
pub enum EventError {
    /// No event key is configured for outbound sends.
    #[error("event key required")]
    MissingEventKey,

    /// One or more events failed validation.
    #[error("event validation failed: {}", report.summary.as_deref().unwrap_or("invalid event"))]
    Validation {
        /// Every validation error collected in the pass
        report: ValidationResult,
    },

    /// The platform could not be reached or rejected the events.
    #[error("failed to send {event_count} event(s): {message}")]
    Delivery {
        /// Number of events in the failed request
        event_count: usize,
        /// Human-readable reason
        message: String,
        /// Whether a later retry might succeed
        retryable: bool,
        /// Transport-level cause
        #[source]
        source: Option<BoxError>,
    },
}

impl EventError {
    /// Taxonomy kind.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Event
    }

    /// Fine-grained machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingEventKey => "EVENT_KEY_REQUIRED",
            Self::Validation { .. } => "EVENT_VALIDATION_FAILED",
            Self::Delivery { .. } => "EVENT_DELIVERY_FAILED",
        }
    }

    /// Returns the validation report when this is a validation failure.
    pub fn validation_report(&self) -> Option<&ValidationResult> {
        match self {
            Self::Validation { report } => Some(report),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_have_stable_codes() {
        assert_eq!(ErrorKind::Webhook.code(), "WEBHOOK_ERROR");
        assert_eq!(ErrorKind::CircuitOpen.to_string(), "CIRCUIT_BREAKER_OPEN");
    }

    #[test]
    fn missing_event_key_message() {
        assert_eq!(EventError::MissingEventKey.to_string(), "event key required");
        assert_eq!(EventError::MissingEventKey.kind(), ErrorKind::Event);
    }

    #[test]
    fn discovery_error_counts_failures() {
        let error = FunctionError::Discovery {
            failures: vec![DiscoveryFailure {
                provider: "billing".to_string(),
                method: "charge".to_string(),
                error: Box::new(FunctionError::DuplicateFunctionId { id: "charge".to_string() }),
            }],
        };

        assert_eq!(error.to_string(), "function discovery failed for 1 registration(s)");
        assert_eq!(error.code(), "DISCOVERY_FAILED");
    }
}
