//! Common types used throughout the middleware pipeline.

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use http_body_util::Full;
use std::fmt;
use uuid::Uuid;

/// The HTTP request type used in the middleware pipeline.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the middleware pipeline.
pub type Response = http::Response<Full<Bytes>>;

/// Time-ordered request identifier (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Extension trait for building the responses the pipeline emits itself.
pub trait ResponseExt {
    /// A `text/plain` response.
    fn text(status: StatusCode, message: &str) -> Response;

    /// An `application/json` response with the given body.
    fn json(status: StatusCode, body: &serde_json::Value) -> Response;

    /// An `application/json` response of the form `{"error": message}`.
    fn json_error(status: StatusCode, message: &str) -> Response;
}

impl ResponseExt for Response {
    fn text(status: StatusCode, message: &str) -> Response {
        with_body(
            status,
            "text/plain; charset=utf-8",
            Bytes::from(message.to_string()),
        )
    }

    fn json(status: StatusCode, body: &serde_json::Value) -> Response {
        with_body(status, "application/json", Bytes::from(body.to_string()))
    }

    fn json_error(status: StatusCode, message: &str) -> Response {
        Self::json(status, &serde_json::json!({ "error": message }))
    }
}

fn with_body(status: StatusCode, content_type: &'static str, body: Bytes) -> Response {
    let mut response = http::Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_text_response() {
        let response = Response::text(StatusCode::GATEWAY_TIMEOUT, "Request timed out");
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn test_json_error_response() {
        let response = Response::json_error(StatusCode::TOO_MANY_REQUESTS, "Too many requests");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"error": "Too many requests"}));
    }

    #[test]
    fn test_request_ids_are_unique_v7() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_uuid().get_version_num(), 7);
    }
}
