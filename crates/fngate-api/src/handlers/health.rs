//! Health endpoint.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, instrument};

use crate::webhook::WebhookController;

/// Reports registration count, signature verification status and outbound
/// transport counters.
///
/// Always 200: a degraded outbound path does not stop webhook handling.
#[instrument(name = "health_check", skip_all)]
pub async fn health_check(State(controller): State<Arc<WebhookController>>) -> Response {
    let report = controller.health();
    debug!(
        status = report.status,
        registered_functions = report.registered_functions,
        "health check completed"
    );
    (StatusCode::OK, Json(report)).into_response()
}
