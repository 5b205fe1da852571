//! Wiremock stand-in for the platform event API.

use std::time::Duration;

use fngate_core::Event;
use serde_json::json;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Mock platform accepting `POST /e/{event_key}`.
pub struct MockPlatform {
    server: MockServer,
    event_key: String,
}

impl MockPlatform {
    /// Starts a server on a random port.
    pub async fn start(event_key: impl Into<String>) -> Self {
        Self { server: MockServer::start().await, event_key: event_key.into() }
    }

    /// Base URL to configure the client with.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    fn events_path(&self) -> String {
        format!("/e/{}", self.event_key)
    }

    fn ingest(&self) -> wiremock::MockBuilder {
        Mock::given(method("POST"))
            .and(path(self.events_path()))
            .and(header("content-type", "application/json"))
    }

    /// Accepts every request with ids `["id-0", ...]` for `ids_per_request`.
    pub async fn accept(&self, ids_per_request: usize) {
        let ids: Vec<String> = (0..ids_per_request).map(|i| format!("id-{i}")).collect();
        self.ingest()
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ids": ids, "status": 200})))
            .mount(&self.server)
            .await;
    }

    /// Answers the next `times` requests with `status`. Mount before
    /// [`accept`](Self::accept) to fail first and succeed afterwards.
    pub async fn fail_times(&self, status: u16, times: u64) {
        self.ingest()
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Answers every request with `status`.
    pub async fn always_fail(&self, status: u16) {
        self.ingest().respond_with(ResponseTemplate::new(status)).mount(&self.server).await;
    }

    /// Answers the next request with 429 and `Retry-After`.
    pub async fn rate_limit_once(&self, retry_after: Duration) {
        self.ingest()
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", retry_after.as_secs().to_string()),
            )
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Number of requests received.
    pub async fn request_count(&self) -> usize {
        self.server.received_requests().await.map_or(0, |r| r.len())
    }

    /// Events received by each request, in arrival order.
    pub async fn received_batches(&self) -> Vec<Vec<Event>> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|request| serde_json::from_slice(&request.body).ok())
            .collect()
    }
}
