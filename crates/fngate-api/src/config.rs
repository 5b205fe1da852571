//! Gateway configuration.
//!
//! Values are layered in priority order:
//! 1. Environment variables prefixed with `INNGEST_` (highest)
//! 2. `fngate.toml` in the working directory
//! 3. Built-in defaults (lowest)
//!
//! `INNGEST_SIGNING_KEY` maps to `signing_key`, `INNGEST_EVENT_KEY` to
//! `event_key`, and so on for every field.

use std::{fmt, net::SocketAddr, path::Path, time::Duration};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use fngate_core::{ConfigError, DiscoveryPolicy, ValidationOptions};
use fngate_transport::{
    retry::MAX_JITTER_FACTOR, CircuitConfig, PlatformConfig, PoolConfig, RetryPolicy,
    TransportConfig, DEFAULT_BASE_URL,
};
use serde::{Deserialize, Serialize};

use crate::signature::SignatureSettings;

/// Default configuration file.
pub const CONFIG_FILE: &str = "fngate.toml";

/// Environment prefix.
pub const ENV_PREFIX: &str = "INNGEST_";

/// Complete gateway configuration.
///
/// # Example
///
/// ```no_run
/// use fngate_api::GatewayConfig;
///
/// let config = GatewayConfig::load().expect("valid configuration");
/// println!("serving {} on {}", config.app_id, config.endpoint);
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    // Identity
    /// Application id advertised to the platform.
    pub app_id: String,
    /// Credential for outbound event sends.
    pub event_key: Option<String>,
    /// Shared secret for inbound webhook verification.
    pub signing_key: Option<String>,

    // Inbound
    /// Path of the webhook endpoint. Must start with `/`.
    pub endpoint: String,
    /// Public origin of this gateway, used in function definitions.
    pub serve_origin: Option<String>,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Accepted signature clock skew in seconds.
    pub signature_tolerance_secs: u64,
    /// Development mode: skips verification and exposes error details.
    pub is_dev: bool,
    /// Skip signature verification outside development mode.
    pub disable_signature_verification: bool,
    /// Fail startup on the first bad registration.
    pub strict_discovery: bool,

    // Outbound
    /// Platform API origin.
    pub base_url: String,
    /// Events per request.
    pub max_batch_size: usize,
    /// Concurrent chunks per batch send.
    pub send_concurrency: usize,
    /// Enforce strict event naming.
    pub strict: bool,
    /// Maximum serialized event size in bytes.
    pub max_payload_bytes: usize,

    // Retry
    /// Attempts per request, including the first.
    pub retry_max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub retry_initial_delay_ms: u64,
    /// Backoff cap, in milliseconds.
    pub retry_max_delay_ms: u64,
    /// Exponential growth factor.
    pub retry_backoff_multiplier: f64,
    /// Proportional jitter, `0.0..=0.3`.
    pub retry_jitter_factor: f64,

    // Pool
    /// Concurrent outbound requests.
    pub pool_max_concurrent: usize,
    /// Per-attempt timeout in seconds.
    pub pool_request_timeout_secs: u64,

    // Circuit breaker
    /// Consecutive failures that open the breaker.
    pub circuit_breaker_failure_threshold: u32,
    /// Seconds before an open breaker lets a probe through.
    pub circuit_breaker_reset_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let circuit = CircuitConfig::default();
        let pool = PoolConfig::default();
        let transport = TransportConfig::default();
        let validation = ValidationOptions::default();

        Self {
            app_id: "fngate".to_string(),
            event_key: None,
            signing_key: None,
            endpoint: "/api/inngest".to_string(),
            serve_origin: None,
            host: "127.0.0.1".to_string(),
            port: 3000,
            request_timeout_secs: 30,
            signature_tolerance_secs: 300,
            is_dev: false,
            disable_signature_verification: false,
            strict_discovery: false,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_batch_size: transport.max_batch_size,
            send_concurrency: transport.concurrency_limit,
            strict: validation.strict,
            max_payload_bytes: validation.max_payload_bytes,
            retry_max_attempts: retry.max_attempts,
            retry_initial_delay_ms: duration_ms(retry.initial_delay),
            retry_max_delay_ms: duration_ms(retry.max_delay),
            retry_backoff_multiplier: retry.backoff_multiplier,
            retry_jitter_factor: retry.jitter_factor,
            pool_max_concurrent: pool.max_concurrent,
            pool_request_timeout_secs: pool.request_timeout.as_secs(),
            circuit_breaker_failure_threshold: circuit.failure_threshold,
            circuit_breaker_reset_timeout_secs: circuit.reset_timeout.as_secs(),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn mask(secret: Option<&String>) -> Option<&'static str> {
    secret.map(|_| "***")
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("app_id", &self.app_id)
            .field("event_key", &mask(self.event_key.as_ref()))
            .field("signing_key", &mask(self.signing_key.as_ref()))
            .field("endpoint", &self.endpoint)
            .field("serve_origin", &self.serve_origin)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("is_dev", &self.is_dev)
            .field("disable_signature_verification", &self.disable_signature_verification)
            .field("base_url", &self.base_url)
            .field("max_batch_size", &self.max_batch_size)
            .field("strict", &self.strict)
            .field("retry_max_attempts", &self.retry_max_attempts)
            .field("pool_max_concurrent", &self.pool_max_concurrent)
            .field("circuit_breaker_failure_threshold", &self.circuit_breaker_failure_threshold)
            .finish_non_exhaustive()
    }
}

impl GatewayConfig {
    /// Loads defaults, `fngate.toml` and `INNGEST_*` variables, then
    /// validates.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if a source cannot be parsed and
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(CONFIG_FILE)
    }

    /// Like [`load`](Self::load) with an explicit file path.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path))
    }

    /// The layered provider chain.
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Extracts and validates a configuration from `figment`.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self =
            figment.extract().map_err(|e| ConfigError::Load { message: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value for range and consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_id.trim().is_empty() {
            return Err(ConfigError::invalid("app_id", "must not be empty"));
        }
        if !self.endpoint.starts_with('/') {
            return Err(ConfigError::invalid("endpoint", "must start with '/'"));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid("port", "must be greater than 0"));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::invalid("max_batch_size", "must be greater than 0"));
        }
        if self.send_concurrency == 0 {
            return Err(ConfigError::invalid("send_concurrency", "must be greater than 0"));
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::invalid("retry_max_attempts", "must be greater than 0"));
        }
        if self.retry_initial_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::invalid(
                "retry_initial_delay_ms",
                "cannot exceed retry_max_delay_ms",
            ));
        }
        if !self.retry_backoff_multiplier.is_finite() || self.retry_backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid("retry_backoff_multiplier", "must be at least 1.0"));
        }
        if !(0.0..=MAX_JITTER_FACTOR).contains(&self.retry_jitter_factor) {
            return Err(ConfigError::invalid(
                "retry_jitter_factor",
                format!("must be between 0.0 and {MAX_JITTER_FACTOR}"),
            ));
        }
        if self.pool_max_concurrent == 0 {
            return Err(ConfigError::invalid("pool_max_concurrent", "must be greater than 0"));
        }
        if self.pool_request_timeout_secs == 0 {
            return Err(ConfigError::invalid("pool_request_timeout_secs", "must be greater than 0"));
        }
        if self.circuit_breaker_failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker_failure_threshold",
                "must be greater than 0",
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(ConfigError::invalid("max_payload_bytes", "must be greater than 0"));
        }
        Ok(())
    }

    /// Outbound retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            backoff_multiplier: self.retry_backoff_multiplier,
            jitter_factor: self.retry_jitter_factor,
            ..RetryPolicy::default()
        }
    }

    /// Breaker settings.
    pub fn to_circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            reset_timeout: Duration::from_secs(self.circuit_breaker_reset_timeout_secs),
        }
    }

    /// Pool settings.
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_concurrent: self.pool_max_concurrent,
            request_timeout: Duration::from_secs(self.pool_request_timeout_secs),
            ..PoolConfig::default()
        }
    }

    /// Event sender settings.
    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig {
            event_key: self.event_key.clone(),
            max_batch_size: self.max_batch_size,
            concurrency_limit: self.send_concurrency,
            ..TransportConfig::default()
        }
    }

    /// Event validation settings.
    pub fn to_validation_options(&self) -> ValidationOptions {
        ValidationOptions { strict: self.strict, max_payload_bytes: self.max_payload_bytes }
    }

    /// Platform client settings, or `None` without an event key.
    pub fn platform_config(&self) -> Option<PlatformConfig> {
        self.event_key.as_ref().map(|event_key| PlatformConfig {
            base_url: self.base_url.clone(),
            event_key: event_key.clone(),
        })
    }

    /// Signature verification settings.
    ///
    /// Development mode and the explicit override both disable verification.
    pub fn signature_settings(&self) -> SignatureSettings {
        SignatureSettings {
            signing_key: self.signing_key.clone(),
            tolerance: Duration::from_secs(self.signature_tolerance_secs),
            disabled: self.is_dev || self.disable_signature_verification,
        }
    }

    /// Registration failure handling.
    pub fn discovery_policy(&self) -> DiscoveryPolicy {
        if self.strict_discovery {
            DiscoveryPolicy::Strict
        } else {
            DiscoveryPolicy::BestEffort
        }
    }

    /// Whole-request timeout for the HTTP server.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Public URL of the webhook endpoint, when an origin is configured.
    pub fn serve_url(&self) -> Option<String> {
        self.serve_origin
            .as_ref()
            .map(|origin| format!("{}{}", origin.trim_end_matches('/'), self.endpoint))
    }

    /// Bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if host and port do not form a socket
    /// address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::invalid("host", format!("invalid server address: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.endpoint, "/api/inngest");
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.discovery_policy(), DiscoveryPolicy::BestEffort);
    }

    #[test]
    fn file_and_env_layers_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                app_id = "billing"
                endpoint = "/webhooks/fn"
                max_batch_size = 25
                retry_max_attempts = 5
                "#,
            )?;
            jail.set_env("INNGEST_SIGNING_KEY", "signkey-prod-abc");
            jail.set_env("INNGEST_EVENT_KEY", "evt-key");
            jail.set_env("INNGEST_MAX_BATCH_SIZE", "50");

            let config = GatewayConfig::load().map_err(|e| e.to_string())?;

            assert_eq!(config.app_id, "billing");
            assert_eq!(config.endpoint, "/webhooks/fn");
            assert_eq!(config.max_batch_size, 50);
            assert_eq!(config.retry_max_attempts, 5);
            assert_eq!(config.signing_key.as_deref(), Some("signkey-prod-abc"));
            assert_eq!(config.event_key.as_deref(), Some("evt-key"));
            Ok(())
        });
    }

    #[test]
    fn invalid_values_are_rejected_at_load() {
        Jail::expect_with(|jail| {
            jail.set_env("INNGEST_ENDPOINT", "api/inngest");
            let error = GatewayConfig::load().unwrap_err();
            assert!(matches!(error, ConfigError::Invalid { field: "endpoint", .. }), "{error}");
            Ok(())
        });
    }

    #[test]
    fn validation_rules() {
        let cases: [(&str, fn(&mut GatewayConfig)); 8] = [
            ("app_id", |c| c.app_id = " ".to_string()),
            ("endpoint", |c| c.endpoint = "inngest".to_string()),
            ("max_batch_size", |c| c.max_batch_size = 0),
            ("retry_max_attempts", |c| c.retry_max_attempts = 0),
            ("retry_backoff_multiplier", |c| c.retry_backoff_multiplier = 0.5),
            ("retry_jitter_factor", |c| c.retry_jitter_factor = 0.5),
            ("pool_max_concurrent", |c| c.pool_max_concurrent = 0),
            ("circuit_breaker_failure_threshold", |c| c.circuit_breaker_failure_threshold = 0),
        ];

        for (field, mutate) in cases {
            let mut config = GatewayConfig::default();
            mutate(&mut config);
            match config.validate() {
                Err(ConfigError::Invalid { field: actual, .. }) => assert_eq!(actual, field),
                other => panic!("expected {field} to be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn conversions_carry_values() {
        let config = GatewayConfig {
            event_key: Some("evt".to_string()),
            retry_max_attempts: 4,
            retry_initial_delay_ms: 250,
            retry_max_delay_ms: 5_000,
            circuit_breaker_failure_threshold: 2,
            circuit_breaker_reset_timeout_secs: 10,
            pool_max_concurrent: 8,
            max_batch_size: 10,
            strict: true,
            ..GatewayConfig::default()
        };

        let retry = config.to_retry_policy();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.initial_delay, Duration::from_millis(250));
        assert_eq!(retry.max_delay, Duration::from_secs(5));

        let circuit = config.to_circuit_config();
        assert_eq!(circuit.failure_threshold, 2);
        assert_eq!(circuit.reset_timeout, Duration::from_secs(10));

        assert_eq!(config.to_pool_config().max_concurrent, 8);
        assert_eq!(config.to_transport_config().max_batch_size, 10);
        assert!(config.to_validation_options().strict);
        assert_eq!(config.platform_config().map(|p| p.event_key), Some("evt".to_string()));
    }

    #[test]
    fn dev_mode_disables_signature_verification() {
        let config = GatewayConfig {
            signing_key: Some("key".to_string()),
            is_dev: true,
            ..GatewayConfig::default()
        };
        assert!(config.signature_settings().disabled);
    }

    #[test]
    fn debug_output_masks_secrets() {
        let config = GatewayConfig {
            signing_key: Some("super-secret".to_string()),
            event_key: Some("also-secret".to_string()),
            ..GatewayConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("also-secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn serve_url_joins_origin_and_endpoint() {
        let config = GatewayConfig {
            serve_origin: Some("https://example.com/".to_string()),
            ..GatewayConfig::default()
        };
        assert_eq!(config.serve_url().as_deref(), Some("https://example.com/api/inngest"));
        assert_eq!(config.parse_server_addr().unwrap().port(), 3000);
    }
}
