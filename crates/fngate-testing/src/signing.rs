//! Signing webhook calls the way the platform does.

use axum::body::Body;
use fngate_api::signature::{sign, SIGNATURE_HEADER};
use http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, Method, Request};

/// Signing key used by fixtures.
pub const TEST_SIGNING_KEY: &str = "signkey-test-0123456789abcdef";

/// Headers for a JSON body signed at `timestamp`.
///
/// # Panics
///
/// Panics if the signature cannot be computed.
pub fn signed_headers(raw_body: &[u8], key: &str, timestamp: i64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let signature = sign(raw_body, key, timestamp).expect("signature computes");
    headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&signature).expect("ascii header"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

/// Signed request for driving an axum router with `tower::ServiceExt::oneshot`.
///
/// # Panics
///
/// Panics if the request cannot be built.
pub fn signed_request(
    method: Method,
    uri: &str,
    raw_body: Vec<u8>,
    key: &str,
    timestamp: i64,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in &signed_headers(&raw_body, key, timestamp) {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(raw_body)).expect("request builds")
}
