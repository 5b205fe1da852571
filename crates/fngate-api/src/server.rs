//! HTTP server setup and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request id propagation
//! 2. Request/response tracing
//! 3. Timeout enforcement, answering 408 when exceeded
//! 4. Handler
//!
//! On SIGINT or SIGTERM the server stops accepting connections and waits
//! for in-flight invocations to finish.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{any, get},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::{handlers, webhook::WebhookController};

/// Header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request id assigned by [`create_router`]'s middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Builds the router: the webhook endpoint (any method) plus `GET /health`.
///
/// # Example
///
/// ```no_run
/// use std::{sync::Arc, time::Duration};
///
/// use fngate_api::{server::create_router, WebhookController};
///
/// fn app(controller: Arc<WebhookController>) -> axum::Router {
///     create_router(controller, Duration::from_secs(30))
/// }
/// ```
pub fn create_router(controller: Arc<WebhookController>, request_timeout: Duration) -> Router {
    let endpoint = controller.endpoint().to_string();

    let mut router = Router::new().route(&endpoint, any(handlers::handle_webhook));
    if endpoint != "/health" {
        router = router.route("/health", get(handlers::health_check));
    }

    router
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(controller)
}

/// Reuses the caller's `x-request-id` or assigns a new one, and echoes it on
/// the response.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Binds `addr` and serves until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns the bind or accept error.
pub async fn start_server(
    controller: Arc<WebhookController>,
    addr: SocketAddr,
    request_timeout: Duration,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, create_router(controller, request_timeout), shutdown_signal()).await
}

/// Serves `router` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns the accept error.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = %listener.local_addr()?, "webhook server listening");
    axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;
    info!("webhook server stopped gracefully");
    Ok(())
}

/// Resolves on CTRL+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => error!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C, starting graceful shutdown"),
        () = terminate => info!("received SIGTERM, starting graceful shutdown"),
    }
}
