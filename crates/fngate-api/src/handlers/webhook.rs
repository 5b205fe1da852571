//! Webhook endpoint adapter.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, Method},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use tracing::instrument;

use crate::webhook::{WebhookController, WebhookRequest, WebhookResponse};

impl IntoResponse for WebhookResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        response.headers_mut().extend(self.headers);
        response
    }
}

/// Passes the call, with its exact body bytes, to the controller.
#[instrument(
    name = "handle_webhook",
    skip_all,
    fields(
        method = %method,
        content_length = body.len(),
    )
)]
pub async fn handle_webhook(
    State(controller): State<Arc<WebhookController>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    controller.handle(WebhookRequest::new(method, headers, body)).await.into_response()
}
