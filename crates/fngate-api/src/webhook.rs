//! Framework-agnostic webhook protocol.
//!
//! An adapter converts its native request into a [`WebhookRequest`], calls
//! [`WebhookController::handle`] and writes the returned
//! [`WebhookResponse`] back. The controller owns the protocol:
//!
//! - `PUT` returns the function definitions for the platform to sync.
//! - `POST` runs one invocation of a registered function.
//! - `GET` reports health.
//!
//! `PUT` and `POST` are signature-verified over the raw request bytes.

use std::{error::Error as StdError, sync::Arc};

use bytes::Bytes;
use fngate_core::{Event, FunctionDefinition, FunctionRegistry};
use fngate_runtime::{ExecutionContextService, RuntimeError};
use fngate_transport::{ConnectionPool, PoolMetrics};
use http::{header::HOST, HeaderMap, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    error::WebhookError,
    signature::{SignatureStatus, SignatureVerifier},
};

/// Response header telling the platform not to retry.
pub const NO_RETRY_HEADER: &str = "x-inngest-no-retry";

/// SDK name advertised on sync.
pub const SDK_NAME: &str = "fngate";

/// Inbound call, decoupled from any HTTP framework.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// HTTP method.
    pub method: Method,
    /// Request headers.
    pub headers: HeaderMap,
    /// Exact body bytes, required for signature verification.
    pub raw_body: Option<Bytes>,
    /// Already-decoded body, used when no raw bytes were captured.
    pub body: Option<Value>,
}

impl WebhookRequest {
    /// Request with captured body bytes.
    pub fn new(method: Method, headers: HeaderMap, raw_body: impl Into<Bytes>) -> Self {
        Self { method, headers, raw_body: Some(raw_body.into()), body: None }
    }

    /// Request whose body was decoded upstream and whose bytes are lost.
    pub fn from_parsed(method: Method, headers: HeaderMap, body: Value) -> Self {
        Self { method, headers, raw_body: None, body: Some(body) }
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, WebhookError> {
        let decoded = match (&self.raw_body, &self.body) {
            (Some(raw), _) => serde_json::from_slice(raw),
            (None, Some(body)) => serde_json::from_value(body.clone()),
            (None, None) => return Err(WebhookError::invalid_request("request body is empty")),
        };
        decoded.map_err(|e| WebhookError::invalid_request(format!("malformed request body: {e}")))
    }
}

/// Outbound answer, decoupled from any HTTP framework.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    /// Status code.
    pub status: StatusCode,
    /// Extra headers.
    pub headers: HeaderMap,
    /// JSON body.
    pub body: Value,
}

impl WebhookResponse {
    /// 200 with `body`.
    pub fn ok(body: Value) -> Self {
        Self { status: StatusCode::OK, headers: HeaderMap::new(), body }
    }

    /// Error response.
    pub fn error(error: &WebhookError) -> Self {
        Self { status: error.status, headers: HeaderMap::new(), body: error.to_body() }
    }

    fn with_no_retry(mut self, no_retry: bool) -> Self {
        let value = if no_retry { "true" } else { "false" };
        self.headers.insert(NO_RETRY_HEADER, HeaderValue::from_static(value));
        self
    }
}

/// Body of an invocation call.
#[derive(Debug, Clone, Deserialize)]
pub struct InvokeRequest {
    /// Function to run.
    pub function_id: String,
    /// Triggering event.
    pub event: Event,
    /// Platform run id.
    pub run_id: String,
    /// Zero-based attempt number.
    #[serde(default)]
    pub attempt: u32,
}

/// SDK identification sent on sync.
#[derive(Debug, Clone, Serialize)]
pub struct SdkInfo {
    /// SDK name.
    pub name: &'static str,
    /// SDK version.
    pub version: &'static str,
    /// Implementation language.
    pub language: &'static str,
    /// HTTP framework.
    pub framework: &'static str,
}

impl Default for SdkInfo {
    fn default() -> Self {
        Self {
            name: SDK_NAME,
            version: env!("CARGO_PKG_VERSION"),
            language: "rust",
            framework: "axum",
        }
    }
}

/// Body of a sync response.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResponse {
    /// Every registered function.
    pub functions: Vec<FunctionDefinition>,
    /// This SDK.
    pub sdk: SdkInfo,
}

/// Body of a health response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// `ok`, or `degraded` while the outbound breaker is not closed.
    pub status: &'static str,
    /// Webhook path.
    pub endpoint: String,
    /// Number of registered functions.
    pub registered_functions: usize,
    /// Inbound authentication.
    pub signature_verification: SignatureStatus,
    /// Outbound pool counters, when a transport is attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<PoolMetrics>,
}

/// Dispatches webhook calls to the registry and runtime.
pub struct WebhookController {
    app_id: String,
    endpoint: String,
    serve_url: Option<String>,
    registry: Arc<FunctionRegistry>,
    runtime: Arc<ExecutionContextService>,
    verifier: SignatureVerifier,
    pool: Option<Arc<ConnectionPool>>,
    expose_error_details: bool,
}

impl std::fmt::Debug for WebhookController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookController")
            .field("app_id", &self.app_id)
            .field("endpoint", &self.endpoint)
            .field("functions", &self.registry.len())
            .field("verifier", &self.verifier)
            .finish_non_exhaustive()
    }
}

impl WebhookController {
    /// Creates a controller for `endpoint`.
    pub fn new(
        app_id: impl Into<String>,
        endpoint: impl Into<String>,
        registry: Arc<FunctionRegistry>,
        runtime: Arc<ExecutionContextService>,
        verifier: SignatureVerifier,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            endpoint: endpoint.into(),
            serve_url: None,
            registry,
            runtime,
            verifier,
            pool: None,
            expose_error_details: false,
        }
    }

    /// Public URL advertised in step definitions. Falls back to the `Host`
    /// header of the sync request.
    #[must_use]
    pub fn with_serve_url(mut self, serve_url: Option<String>) -> Self {
        self.serve_url = serve_url;
        self
    }

    /// Reports `pool` metrics on health.
    #[must_use]
    pub fn with_pool(mut self, pool: Arc<ConnectionPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Includes error cause chains in failure responses. Development only.
    #[must_use]
    pub fn with_error_details(mut self, expose: bool) -> Self {
        self.expose_error_details = expose;
        self
    }

    /// Webhook path.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The registry being served.
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// The signature verifier.
    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    /// Handles one call.
    #[instrument(name = "webhook", skip_all, fields(method = %request.method))]
    pub async fn handle(&self, request: WebhookRequest) -> WebhookResponse {
        let result = match request.method {
            Method::PUT => self.sync(&request).map(|body| WebhookResponse::ok(json!(body))),
            Method::POST => self.invoke(&request).await,
            Method::GET => Ok(WebhookResponse::ok(json!(self.health()))),
            ref other => Err(WebhookError::method_not_allowed(other)),
        };

        result.unwrap_or_else(|error| {
            warn!(status = error.status.as_u16(), code = error.code, error = %error, "webhook rejected");
            WebhookResponse::error(&error)
        })
    }

    /// Verifies the call and returns every function definition.
    ///
    /// # Errors
    ///
    /// Signature failures.
    pub fn sync(&self, request: &WebhookRequest) -> Result<SyncResponse, WebhookError> {
        self.verifier.verify(&request.headers, request.raw_body.as_deref())?;

        let serve_url = self.serve_url.clone().or_else(|| self.url_from_host(&request.headers));
        let functions = self.registry.to_definitions(&self.app_id, serve_url.as_deref());
        info!(functions = functions.len(), "serving function definitions");

        Ok(SyncResponse { functions, sdk: SdkInfo::default() })
    }

    fn url_from_host(&self, headers: &HeaderMap) -> Option<String> {
        let host = headers.get(HOST)?.to_str().ok()?;
        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("http");
        Some(format!("{scheme}://{host}{}", self.endpoint))
    }

    /// Verifies the call, runs the function and maps the outcome to a
    /// response.
    ///
    /// # Errors
    ///
    /// Signature failures, malformed bodies and unknown functions. Handler
    /// failures become error responses, not `Err`.
    pub async fn invoke(&self, request: &WebhookRequest) -> Result<WebhookResponse, WebhookError> {
        self.verifier.verify(&request.headers, request.raw_body.as_deref())?;
        let invocation: InvokeRequest = request.decode()?;

        let function = self.registry.lookup(&invocation.function_id).ok_or_else(|| {
            debug!(function_id = %invocation.function_id, "invocation for unknown function");
            WebhookError::function_not_found(&invocation.function_id)
        })?;

        let outcome = self
            .runtime
            .run(function, invocation.event, invocation.run_id, invocation.attempt)
            .await;

        match outcome {
            Ok(outcome) => {
                Ok(WebhookResponse::ok(json!({"status": "ok", "result": outcome.result})))
            },
            Err(error) => Ok(self.execution_failure(&invocation.function_id, &error)),
        }
    }

    /// Maps a failed run to its response.
    ///
    /// A non-retriable handler error answers 400 with `x-inngest-no-retry:
    /// true` so the platform stops retrying. A run already in flight for the
    /// same function, run and attempt answers 409. Other handler errors
    /// answer 500 and stay retriable.
    fn execution_failure(&self, function_id: &str, error: &RuntimeError) -> WebhookResponse {
        let (status, message) = match error {
            RuntimeError::AlreadyRunning { .. } => (StatusCode::CONFLICT, error.to_string()),
            RuntimeError::Handler { no_retry: true, source, .. } => {
                (StatusCode::BAD_REQUEST, source.to_string())
            },
            RuntimeError::Handler { source, .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, source.to_string())
            },
        };
        error!(function_id, code = error.code(), error = %error, "function execution failed");

        let webhook_error = WebhookError::new(status, error.code(), message).for_function(function_id);
        let mut response = WebhookResponse::error(&webhook_error);
        if self.expose_error_details {
            response.body["error"]["details"] = json!(error_chain(error));
        }
        if matches!(error, RuntimeError::Handler { .. }) {
            response = response.with_no_retry(error.is_non_retriable());
        }
        response
    }

    /// Current health.
    pub fn health(&self) -> HealthReport {
        let transport = self.pool.as_ref().map(|pool| pool.metrics());
        let degraded = transport
            .as_ref()
            .is_some_and(|m| m.circuit_state != fngate_transport::CircuitState::Closed);

        HealthReport {
            status: if degraded { "degraded" } else { "ok" },
            endpoint: self.endpoint.clone(),
            registered_functions: self.registry.len(),
            signature_verification: self.verifier.status(),
            transport,
        }
    }
}

fn error_chain(error: &(dyn StdError + 'static)) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = error.source();
    while let Some(cause) = current {
        chain.push(cause.to_string());
        current = cause.source();
    }
    chain
}

#[cfg(test)]
mod tests {
    use fngate_core::{
        handler_fn, BoxError, FunctionConfig, NonRetriableError, TestClock,
    };
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::signature::{sign, SignatureSettings, SIGNATURE_HEADER};

    const KEY: &str = "signkey-test-abc";
    const NOW: u64 = 1_700_000_000;

    fn controller(verifier_settings: SignatureSettings) -> WebhookController {
        let mut registry = FunctionRegistry::new();
        registry
            .register_handler(
                FunctionConfig::new("send-welcome").on_event("user.created"),
                handler_fn(|event: Event, _| async move {
                    Ok(json!({"greeted": event.data_field("userId")}))
                }),
            )
            .unwrap();
        registry
            .register_handler(
                FunctionConfig::new("charge-card").on_event("order.placed"),
                handler_fn(|_, _| async {
                    Err::<Value, BoxError>(Box::new(NonRetriableError::new("card declined")))
                }),
            )
            .unwrap();
        registry
            .register_handler(
                FunctionConfig::new("flaky").on_event("order.placed"),
                handler_fn(|_, _| async { Err::<Value, BoxError>("upstream down".into()) }),
            )
            .unwrap();

        let clock = Arc::new(TestClock::at_unix_seconds(NOW));
        WebhookController::new(
            "test-app",
            "/api/inngest",
            Arc::new(registry),
            Arc::new(ExecutionContextService::new(clock.clone())),
            SignatureVerifier::new(verifier_settings, clock),
        )
    }

    fn signed(method: Method, body: &Value) -> WebhookRequest {
        let raw = serde_json::to_vec(body).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, sign(&raw, KEY, NOW as i64).unwrap().parse().unwrap());
        WebhookRequest::new(method, headers, raw)
    }

    fn invocation(function_id: &str) -> Value {
        json!({
            "function_id": function_id,
            "event": {"name": "user.created", "data": {"userId": "u1"}},
            "run_id": "run-1",
            "attempt": 0
        })
    }

    #[tokio::test]
    async fn post_runs_function() {
        let controller = controller(SignatureSettings::with_key(KEY));

        let response = controller.handle(signed(Method::POST, &invocation("send-welcome"))).await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, json!({"status": "ok", "result": {"greeted": "u1"}}));
    }

    #[tokio::test]
    async fn unknown_function_is_not_found() {
        let controller = controller(SignatureSettings::with_key(KEY));

        let response = controller.handle(signed(Method::POST, &invocation("missing"))).await;

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.body["error"]["code"], "FUNCTION_NOT_FOUND");
        assert_eq!(response.body["error"]["function_id"], "missing");
    }

    #[tokio::test]
    async fn unsigned_post_is_unauthorized() {
        let controller = controller(SignatureSettings::with_key(KEY));
        let raw = serde_json::to_vec(&invocation("send-welcome")).unwrap();

        let response = controller.handle(WebhookRequest::new(Method::POST, HeaderMap::new(), raw)).await;

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.body["error"]["code"], "MISSING_SIGNATURE");
    }

    #[tokio::test]
    async fn parsed_body_without_raw_bytes_is_rejected_when_verifying() {
        let controller = controller(SignatureSettings::with_key(KEY));
        let raw = serde_json::to_vec(&invocation("send-welcome")).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, sign(&raw, KEY, NOW as i64).unwrap().parse().unwrap());

        let response = controller
            .handle(WebhookRequest::from_parsed(Method::POST, headers, invocation("send-welcome")))
            .await;

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["error"]["code"], "RAW_BODY_REQUIRED");
    }

    #[tokio::test]
    async fn parsed_body_is_accepted_without_verification() {
        let controller = controller(SignatureSettings::default());

        let response = controller
            .handle(WebhookRequest::from_parsed(
                Method::POST,
                HeaderMap::new(),
                invocation("send-welcome"),
            ))
            .await;

        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let controller = controller(SignatureSettings::with_key(KEY));

        let response = controller.handle(signed(Method::POST, &json!({"function_id": 7}))).await;

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["error"]["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn handler_failure_is_server_error() {
        let controller = controller(SignatureSettings::with_key(KEY));

        let response = controller.handle(signed(Method::POST, &invocation("flaky"))).await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body["error"], json!({
            "message": "upstream down",
            "code": "FUNCTION_EXECUTION_ERROR",
            "function_id": "flaky"
        }));
        assert_eq!(response.headers.get(NO_RETRY_HEADER).unwrap(), "false");
    }

    #[tokio::test]
    async fn non_retriable_failure_sets_no_retry() {
        let controller = controller(SignatureSettings::with_key(KEY));

        let response = controller.handle(signed(Method::POST, &invocation("charge-card"))).await;

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["error"]["code"], "NON_RETRIABLE_ERROR");
        assert_eq!(response.headers.get(NO_RETRY_HEADER).unwrap(), "true");
    }

    #[tokio::test]
    async fn concurrent_duplicate_invocation_conflicts() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (on_start, on_release) = (Arc::clone(&started), Arc::clone(&release));

        let mut registry = FunctionRegistry::new();
        registry
            .register_handler(
                FunctionConfig::new("gated").on_event("user.created"),
                handler_fn(move |_, _| {
                    let (on_start, on_release) = (Arc::clone(&on_start), Arc::clone(&on_release));
                    async move {
                        on_start.notify_one();
                        on_release.notified().await;
                        Ok::<_, BoxError>(json!("done"))
                    }
                }),
            )
            .unwrap();
        let clock = Arc::new(TestClock::at_unix_seconds(NOW));
        let controller = WebhookController::new(
            "test-app",
            "/api/inngest",
            Arc::new(registry),
            Arc::new(ExecutionContextService::new(clock.clone())),
            SignatureVerifier::new(SignatureSettings::with_key(KEY), clock),
        );

        let first = controller.handle(signed(Method::POST, &invocation("gated")));
        let second = async {
            started.notified().await;
            let response = controller.handle(signed(Method::POST, &invocation("gated"))).await;
            release.notify_one();
            response
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.status, StatusCode::OK);
        assert_eq!(second.status, StatusCode::CONFLICT);
        assert_eq!(second.body["error"]["code"], "EXECUTION_IN_PROGRESS");
        assert!(second.headers.get(NO_RETRY_HEADER).is_none());
    }

    #[tokio::test]
    async fn error_details_only_in_dev() {
        let production = controller(SignatureSettings::with_key(KEY));
        let dev = controller(SignatureSettings::with_key(KEY)).with_error_details(true);

        let hidden = production.handle(signed(Method::POST, &invocation("flaky"))).await;
        let shown = dev.handle(signed(Method::POST, &invocation("flaky"))).await;

        assert!(hidden.body["error"].get("details").is_none());
        assert_eq!(shown.body["error"]["details"], json!(["upstream down"]));
    }

    #[tokio::test]
    async fn put_returns_definitions() {
        let controller = controller(SignatureSettings::with_key(KEY))
            .with_serve_url(Some("https://example.com/api/inngest".to_string()));

        let response = controller.handle(signed(Method::PUT, &json!({}))).await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["functions"].as_array().unwrap().len(), 3);
        assert_eq!(response.body["sdk"]["name"], "fngate");
        assert_eq!(response.body["sdk"]["language"], "rust");
    }

    #[tokio::test]
    async fn get_reports_health() {
        let controller = controller(SignatureSettings::with_key(KEY));

        let response = controller
            .handle(WebhookRequest::new(Method::GET, HeaderMap::new(), Bytes::new()))
            .await;

        assert_eq!(response.body, json!({
            "status": "ok",
            "endpoint": "/api/inngest",
            "registeredFunctions": 3,
            "signatureVerification": {
                "enabled": true,
                "hasSigningKey": true,
                "algorithm": "HMAC-SHA256",
                "toleranceSeconds": 300
            }
        }));
    }

    #[tokio::test]
    async fn other_methods_are_not_allowed() {
        let controller = controller(SignatureSettings::default());

        let response = controller
            .handle(WebhookRequest::new(Method::DELETE, HeaderMap::new(), Bytes::new()))
            .await;

        assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
    }
}
