//! HTTP client for the platform event API.
//!
//! One call to [`EventBackend::post_events`] is one attempt: retries,
//! timeouts and breaker accounting belong to the
//! [`ConnectionPool`](crate::pool::ConnectionPool).

use std::{error::Error as StdError, io, time::Duration};

use async_trait::async_trait;
use fngate_core::{Event, SendReceipt};
use reqwest::{header::HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    error::{NetworkErrorKind, Result, TransportError},
    pool::Agents,
};

/// Default platform API origin.
pub const DEFAULT_BASE_URL: &str = "https://inn.gs";

/// SDK identification sent with every request.
pub const SDK_HEADER_VALUE: &str = concat!("fngate:v", env!("CARGO_PKG_VERSION"));

const MAX_ERROR_BODY_BYTES: usize = 1024;

/// A destination that accepts one batch of events per call.
#[async_trait]
pub trait EventBackend: Send + Sync {
    /// Sends `events` in one request.
    async fn post_events(&self, events: &[Event]) -> Result<SendReceipt>;
}

/// Where and how to reach the platform.
#[derive(Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// API origin, e.g. `https://inn.gs`.
    pub base_url: String,
    /// Event key appended to the ingest path.
    pub event_key: String,
}

impl std::fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("base_url", &self.base_url)
            .field("event_key", &"***")
            .finish()
    }
}

/// `reqwest` implementation of [`EventBackend`].
#[derive(Debug, Clone)]
pub struct PlatformClient {
    agents: Agents,
    config: PlatformConfig,
}

impl PlatformClient {
    /// Creates a client sending through `agents`.
    pub fn new(config: PlatformConfig, agents: Agents) -> Self {
        Self { agents, config }
    }

    fn events_url(&self) -> String {
        format!("{}/e/{}", self.config.base_url.trim_end_matches('/'), self.config.event_key)
    }
}

#[async_trait]
impl EventBackend for PlatformClient {
    async fn post_events(&self, events: &[Event]) -> Result<SendReceipt> {
        let url = self.events_url();
        let span = info_span!(
            "platform_send",
            base_url = %self.config.base_url,
            event_count = events.len(),
        );

        async move {
            let started = std::time::Instant::now();
            let response = self
                .agents
                .for_url(&url)
                .post(&url)
                .header("x-inngest-sdk", SDK_HEADER_VALUE)
                .json(events)
                .send()
                .await
                .map_err(|e| {
                    let error = classify_reqwest_error(&e);
                    warn!(
                        duration_ms = started.elapsed().as_millis() as u64,
                        error = %error,
                        "send failed"
                    );
                    error
                })?;

            let status = response.status();
            debug!(
                status = status.as_u16(),
                duration_ms = started.elapsed().as_millis() as u64,
                "platform responded"
            );

            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(TransportError::RateLimited {
                    retry_after: parse_retry_after(response.headers()),
                });
            }

            let body = response.bytes().await.map_err(|e| {
                TransportError::network(
                    NetworkErrorKind::ConnectionReset,
                    format!("failed to read response: {e}"),
                )
            })?;

            if !status.is_success() {
                let end = body.len().min(MAX_ERROR_BODY_BYTES);
                return Err(TransportError::http(
                    status.as_u16(),
                    String::from_utf8_lossy(&body[..end]),
                ));
            }

            if body.is_empty() {
                return Ok(SendReceipt { ids: Vec::new(), status: status.as_u16() });
            }

            serde_json::from_slice::<SendReceipt>(&body).map_err(|e| {
                TransportError::InvalidResponse {
                    message: format!("could not decode send response: {e}"),
                }
            })
        }
        .instrument(span)
        .await
    }
}

/// Maps a `reqwest` error onto a [`NetworkErrorKind`].
pub fn classify_reqwest_error(error: &reqwest::Error) -> TransportError {
    let message = error.to_string();

    if error.is_timeout() {
        return TransportError::network(NetworkErrorKind::TimedOut, message);
    }

    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(cause) = source {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            let kind = match io_error.kind() {
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe => Some(NetworkErrorKind::ConnectionReset),
                io::ErrorKind::ConnectionRefused => Some(NetworkErrorKind::ConnectionRefused),
                io::ErrorKind::TimedOut => Some(NetworkErrorKind::TimedOut),
                _ => None,
            };
            if let Some(kind) = kind {
                return TransportError::network(kind, message);
            }
        }

        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("temporary failure in name resolution") || text.contains("try again") {
            return TransportError::network(NetworkErrorKind::DnsTemporary, message);
        }
        if text.contains("dns error")
            || text.contains("failed to lookup address")
            || text.contains("name or service not known")
        {
            return TransportError::network(NetworkErrorKind::NotFound, message);
        }
        source = cause.source();
    }

    if error.is_connect() {
        return TransportError::network(NetworkErrorKind::ConnectionRefused, message);
    }
    if error.is_request() || error.is_body() {
        return TransportError::network(NetworkErrorKind::ConnectionReset, message);
    }

    TransportError::network(NetworkErrorKind::Other, message)
}

/// Reads `Retry-After` as delta-seconds or an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    (date.with_timezone(&chrono::Utc) - chrono::Utc::now()).to_std().ok()
}
