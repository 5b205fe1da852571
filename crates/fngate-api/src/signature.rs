//! HMAC-SHA256 verification of inbound webhook calls.
//!
//! The platform signs each request with the shared signing key and sends
//! `x-inngest-signature: s=<hex>,t=<unix-seconds>[,v=<version>]`. The MAC
//! covers `"{t}.{raw_body}"`, so verification must run over the exact bytes
//! received, never over a re-serialized body.

use std::{fmt, sync::Arc, time::Duration};

use fngate_core::Clock;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "x-inngest-signature";

/// Reported algorithm name.
pub const ALGORITHM: &str = "HMAC-SHA256";

/// Default accepted clock skew between the platform and this gateway.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Components of a signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    /// Hex-encoded MAC (`s`).
    pub signature: String,
    /// Signing time in unix seconds (`t`).
    pub timestamp: i64,
    /// Optional scheme version (`v`).
    pub version: Option<String>,
}

/// Parses `s=<hex>,t=<unix>[,v=<version>]`.
///
/// Pairs may appear in any order and unknown keys are ignored.
///
/// # Errors
///
/// Returns an `INVALID_SIGNATURE_FORMAT` error if `s` or `t` is missing or
/// empty, or if `t` is not an integer.
///
/// # Example
///
/// ```
/// use fngate_api::signature::parse_signature_header;
///
/// let parsed = parse_signature_header("t=1700000000,s=abc123").unwrap();
/// assert_eq!(parsed.timestamp, 1_700_000_000);
/// assert_eq!(parsed.signature, "abc123");
/// ```
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, WebhookError> {
    let mut signature = None;
    let mut timestamp = None;
    let mut version = None;

    for part in header.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "s" => signature = Some(value),
            "t" => timestamp = Some(value),
            "v" => version = Some(value.to_string()),
            _ => {},
        }
    }

    let signature = signature
        .filter(|s| !s.is_empty())
        .ok_or_else(WebhookError::invalid_signature_format)?;
    let timestamp = timestamp
        .and_then(|t| t.parse::<i64>().ok())
        .ok_or_else(WebhookError::invalid_signature_format)?;

    Ok(ParsedSignature { signature: signature.to_string(), timestamp, version })
}

fn keyed_mac(
    raw_body: &[u8],
    signing_key: &str,
    timestamp: i64,
) -> Result<HmacSha256, WebhookError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(signing_key.as_bytes())
        .map_err(|_| WebhookError::invalid_signature())?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    Ok(mac)
}

/// Hex MAC over `"{timestamp}.{raw_body}"`.
///
/// # Errors
///
/// Returns `INVALID_SIGNATURE` if the key cannot initialise the MAC.
pub fn compute_signature(
    raw_body: &[u8],
    signing_key: &str,
    timestamp: i64,
) -> Result<String, WebhookError> {
    let mac = keyed_mac(raw_body, signing_key, timestamp)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Builds a complete signature header value.
///
/// # Errors
///
/// See [`compute_signature`].
pub fn sign(raw_body: &[u8], signing_key: &str, timestamp: i64) -> Result<String, WebhookError> {
    Ok(format!("s={},t={timestamp}", compute_signature(raw_body, signing_key, timestamp)?))
}

/// Verification settings.
#[derive(Clone, Default)]
pub struct SignatureSettings {
    /// Shared secret. Verification is skipped when absent.
    pub signing_key: Option<String>,
    /// Accepted skew. Zero means [`DEFAULT_TOLERANCE`].
    pub tolerance: Duration,
    /// Skip verification even when a key is configured.
    pub disabled: bool,
}

impl fmt::Debug for SignatureSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureSettings")
            .field("signing_key", &self.signing_key.as_ref().map(|_| "***"))
            .field("tolerance", &self.tolerance)
            .field("disabled", &self.disabled)
            .finish()
    }
}

impl SignatureSettings {
    /// Settings that verify with `signing_key` and the default tolerance.
    pub fn with_key(signing_key: impl Into<String>) -> Self {
        Self { signing_key: Some(signing_key.into()), tolerance: DEFAULT_TOLERANCE, disabled: false }
    }

    fn effective_tolerance(&self) -> Duration {
        if self.tolerance.is_zero() {
            DEFAULT_TOLERANCE
        } else {
            self.tolerance
        }
    }
}

/// Verification status as reported by the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
    /// Requests are being verified.
    pub enabled: bool,
    /// A signing key is configured.
    pub has_signing_key: bool,
    /// MAC algorithm.
    pub algorithm: &'static str,
    /// Accepted skew in seconds.
    pub tolerance_seconds: u64,
}

/// Verifies inbound webhook signatures against a shared key.
pub struct SignatureVerifier {
    settings: SignatureSettings,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier").field("settings", &self.settings).finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    /// Creates a verifier. Logs a warning when verification is off.
    pub fn new(settings: SignatureSettings, clock: Arc<dyn Clock>) -> Self {
        if settings.disabled {
            warn!("signature verification explicitly disabled; webhook calls are NOT authenticated");
        } else if settings.signing_key.is_none() {
            warn!("no signing key configured; webhook calls are NOT authenticated");
        }
        Self { settings, clock }
    }

    /// Whether requests are checked.
    pub fn is_enabled(&self) -> bool {
        !self.settings.disabled && self.settings.signing_key.is_some()
    }

    /// Accepted skew.
    pub fn tolerance(&self) -> Duration {
        self.settings.effective_tolerance()
    }

    /// Health view.
    pub fn status(&self) -> SignatureStatus {
        SignatureStatus {
            enabled: self.is_enabled(),
            has_signing_key: self.settings.signing_key.is_some(),
            algorithm: ALGORITHM,
            tolerance_seconds: self.tolerance().as_secs(),
        }
    }

    /// Signs `raw_body` at the current clock time, or returns `None` without
    /// a key.
    pub fn sign(&self, raw_body: &[u8]) -> Option<String> {
        let key = self.settings.signing_key.as_deref()?;
        sign(raw_body, key, self.clock.unix_seconds()).ok()
    }

    /// Verifies the signature header in `headers` over `raw_body`.
    ///
    /// Returns `Ok(None)` when verification is off.
    ///
    /// # Errors
    ///
    /// See [`verify_header`](Self::verify_header).
    pub fn verify(
        &self,
        headers: &HeaderMap,
        raw_body: Option<&[u8]>,
    ) -> Result<Option<ParsedSignature>, WebhookError> {
        if !self.is_enabled() {
            warn!("skipping webhook signature verification");
            return Ok(None);
        }
        let header = match headers.get(SIGNATURE_HEADER) {
            None => None,
            Some(value) => {
                Some(value.to_str().map_err(|_| WebhookError::invalid_signature_format())?)
            },
        };
        self.verify_header(header, raw_body).map(Some)
    }

    /// Checks presence, format, timestamp tolerance and MAC, in that order.
    ///
    /// # Errors
    ///
    /// `MISSING_SIGNATURE`, `INVALID_SIGNATURE_FORMAT`, `SIGNATURE_EXPIRED`,
    /// `RAW_BODY_REQUIRED` or `INVALID_SIGNATURE`.
    pub fn verify_header(
        &self,
        header: Option<&str>,
        raw_body: Option<&[u8]>,
    ) -> Result<ParsedSignature, WebhookError> {
        let Some(key) = self.settings.signing_key.as_deref() else {
            return Err(WebhookError::invalid_signature());
        };
        let header = header.ok_or_else(WebhookError::missing_signature)?;
        let parsed = parse_signature_header(header)?;

        let now = self.clock.unix_seconds();
        if now.abs_diff(parsed.timestamp) > self.tolerance().as_secs() {
            debug!(now, timestamp = parsed.timestamp, "signature timestamp out of tolerance");
            return Err(WebhookError::signature_expired());
        }

        let raw_body = raw_body.ok_or_else(WebhookError::raw_body_required)?;
        let provided = hex::decode(&parsed.signature).map_err(|_| WebhookError::invalid_signature())?;
        keyed_mac(raw_body, key, parsed.timestamp)?
            .verify_slice(&provided)
            .map_err(|_| WebhookError::invalid_signature())?;

        Ok(parsed)
    }
}
