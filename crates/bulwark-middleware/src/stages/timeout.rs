//! Handler deadline.
//!
//! Races the rest of the chain against a timer. If the timer wins, the
//! downstream future is dropped and the client gets `504 Request timed out`.
//! Work the handler spawned onto other tasks is not cancelled.

use crate::config::{TimeoutSettings, DEFAULT_TIMEOUT};
use crate::context::MiddlewareContext;
use crate::error::MiddlewareResult;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use http::StatusCode;
use std::time::Duration;

/// Body of the timeout response.
pub const TIMEOUT_MESSAGE: &str = "Request timed out";

/// Handler deadline middleware.
#[derive(Debug, Clone)]
pub struct TimeoutMiddleware {
    duration: Duration,
}

impl Default for TimeoutMiddleware {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl TimeoutMiddleware {
    /// Creates a timeout stage with the given deadline.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Creates a timeout stage from settings.
    #[must_use]
    pub fn from_settings(settings: &TimeoutSettings) -> Self {
        Self::new(settings.duration())
    }

    /// Returns the deadline.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Middleware for TimeoutMiddleware {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, MiddlewareResult> {
        Box::pin(async move {
            let path = request.uri().path().to_string();
            match tokio::time::timeout(self.duration, next.run(ctx, request)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        path = %path,
                        timeout_ms = u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
                        "request timed out"
                    );
                    ctx.mark_short_circuit(self.name());
                    Ok(Response::text(StatusCode::GATEWAY_TIMEOUT, TIMEOUT_MESSAGE))
                }
            }
        })
    }
}
