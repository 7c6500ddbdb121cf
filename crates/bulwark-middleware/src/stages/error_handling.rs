//! Fault to response conversion.
//!
//! Catches any error or panic from the stages below it and answers
//! `500 {"error": "<message>"}`. Responses, whatever their status, pass
//! through untouched.

use crate::context::MiddlewareContext;
use crate::error::{MiddlewareError, MiddlewareResult};
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use futures_util::FutureExt;
use http::StatusCode;
use std::panic::AssertUnwindSafe;

/// Error-handling middleware.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorHandlingMiddleware;

impl ErrorHandlingMiddleware {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn fault_response(ctx: &MiddlewareContext, err: &MiddlewareError) -> Response {
        tracing::error!(
            request_id = %ctx.request_id(),
            error = %err,
            "request failed"
        );
        Response::json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
    }
}

impl Middleware for ErrorHandlingMiddleware {
    fn name(&self) -> &'static str {
        "error_handling"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, MiddlewareResult> {
        Box::pin(async move {
            let outcome = AssertUnwindSafe(next.run(ctx, request))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => Ok(Self::fault_response(ctx, &err)),
                Err(payload) => Ok(Self::fault_response(
                    ctx,
                    &MiddlewareError::from_panic(payload),
                )),
            }
        })
    }
}
