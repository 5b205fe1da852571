//! Request-scoped webhook failures.
//!
//! Every [`WebhookError`] carries the HTTP status the adapter should answer
//! with, a stable machine-readable code and a human message. The wire form
//! is `{"error": {"message", "code", "function_id"?}}`.

use fngate_core::ErrorKind;
use http::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

/// Inbound protocol, authentication or execution failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WebhookError {
    /// Status to respond with.
    pub status: StatusCode,
    /// Machine-readable code.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Function the request targeted, when known.
    pub function_id: Option<String>,
}

impl WebhookError {
    /// Creates an error with an explicit status and code.
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into(), function_id: None }
    }

    /// Attaches the target function id.
    #[must_use]
    pub fn for_function(mut self, function_id: impl Into<String>) -> Self {
        self.function_id = Some(function_id.into());
        self
    }

    /// No signature header on a verified request.
    pub fn missing_signature() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "MISSING_SIGNATURE", "missing signature header")
    }

    /// Signature header could not be parsed.
    pub fn invalid_signature_format() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "INVALID_SIGNATURE_FORMAT",
            "invalid signature header format",
        )
    }

    /// Signature timestamp outside the tolerance window.
    pub fn signature_expired() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "SIGNATURE_EXPIRED", "timestamp out of tolerance")
    }

    /// HMAC mismatch.
    pub fn invalid_signature() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE", "signature verification failed")
    }

    /// Verification is enabled but the adapter did not capture the body bytes.
    pub fn raw_body_required() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "RAW_BODY_REQUIRED",
            "raw request body is required for signature verification",
        )
    }

    /// Body could not be decoded into an invocation.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    /// Method other than GET, PUT or POST.
    pub fn method_not_allowed(method: &http::Method) -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "METHOD_NOT_ALLOWED",
            format!("method {method} is not supported"),
        )
    }

    /// No registered function with this id.
    pub fn function_not_found(function_id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "FUNCTION_NOT_FOUND",
            format!("function `{function_id}` not found"),
        )
        .for_function(function_id)
    }

    /// Taxonomy kind.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Webhook
    }

    /// Wire body.
    pub fn to_body(&self) -> Value {
        let mut error = json!({"message": self.message, "code": self.code});
        if let Some(function_id) = &self.function_id {
            error["function_id"] = Value::String(function_id.clone());
        }
        json!({ "error": error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_errors_are_unauthorized() {
        for error in [
            WebhookError::missing_signature(),
            WebhookError::invalid_signature_format(),
            WebhookError::signature_expired(),
            WebhookError::invalid_signature(),
        ] {
            assert_eq!(error.status, StatusCode::UNAUTHORIZED, "{}", error.code);
        }
    }

    #[test]
    fn body_includes_function_id_when_known() {
        let body = WebhookError::function_not_found("send-welcome").to_body();

        assert_eq!(
            body,
            json!({"error": {
                "message": "function `send-welcome` not found",
                "code": "FUNCTION_NOT_FOUND",
                "function_id": "send-welcome"
            }})
        );
    }

    #[test]
    fn body_omits_function_id_otherwise() {
        let body = WebhookError::missing_signature().to_body();
        assert_eq!(body["error"]["code"], "MISSING_SIGNATURE");
        assert!(body["error"].get("function_id").is_none());
    }
}
