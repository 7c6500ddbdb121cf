//! Last-resort fault handler.
//!
//! Anything that escapes every stage ends up here. The original error is
//! logged; the client only ever sees a fixed message.

use crate::context::MiddlewareContext;
use crate::error::MiddlewareError;
use crate::types::{Response, ResponseExt};
use http::StatusCode;

/// Body message of the generic 500.
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal server error occurred.";

/// The generic 500: `{"message": "An internal server error occurred."}`.
#[must_use]
pub fn internal_error_response() -> Response {
    Response::json(
        StatusCode::INTERNAL_SERVER_ERROR,
        &serde_json::json!({ "message": INTERNAL_ERROR_MESSAGE }),
    )
}

/// Logs `err` and returns [`internal_error_response`].
pub fn handle_fault(ctx: &MiddlewareContext, err: &MiddlewareError) -> Response {
    tracing::error!(
        request_id = %ctx.request_id(),
        error = %err,
        "unhandled fault in request pipeline"
    );
    internal_error_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_generic_body_hides_error() {
        let ctx = MiddlewareContext::new();
        let response = handle_fault(&ctx, &MiddlewareError::handler("secret detail"));

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("secret detail"));
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&text).unwrap(),
            serde_json::json!({"message": "An internal server error occurred."})
        );
    }
}
