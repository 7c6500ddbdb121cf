//! Ordered middleware pipeline.
//!
//! ## Stage order
//!
//! Stages always run in this order, outermost first. Disabled stages are
//! left out; the rest keep their relative positions.
//!
//! 1. **CORS** - cross-origin headers and pre-flight answers
//! 2. **Gzip** - compresses large responses
//! 3. **Session** - signed cookie session
//! 4. **Trusted host** - rejects unknown Host headers
//! 5. **Error handling** - turns faults below it into 500 responses
//! 6. **Rate limit** - IP blacklist and request/token budget
//! 7. **Timeout** - bounds handler execution
//!
//! Error handling wraps rate limit and timeout so their faults are caught.
//! Timeout sits innermost so it bounds only the handler.
//!
//! Whatever escapes every stage is caught by [`Pipeline::process`] itself
//! and answered by the [fallback](crate::fallback).

use crate::context::MiddlewareContext;
use crate::error::{MiddlewareError, MiddlewareResult};
use crate::fallback;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// An immutable chain of stages.
///
/// # Example
///
/// ```ignore
/// use bulwark_middleware::pipeline::Pipeline;
/// use bulwark_middleware::stages::TimeoutMiddleware;
///
/// let pipeline = Pipeline::builder()
///     .add_stage(TimeoutMiddleware::default())
///     .build();
///
/// let response = pipeline.process(&mut ctx, request, handler).await;
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Runs a request through every stage and then `handler`.
    ///
    /// Never fails. Faults and panics that no stage converted are logged and
    /// answered with the generic 500 from [`fallback::internal_error_response`].
    pub async fn process<H>(
        &self,
        ctx: &mut MiddlewareContext,
        request: Request,
        handler: H,
    ) -> Response
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, MiddlewareResult>
            + Send
            + 'static,
    {
        let next = self.build_chain(handler);
        let outcome = AssertUnwindSafe(next.run(ctx, request))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => fallback::handle_fault(ctx, &err),
            Err(payload) => fallback::handle_fault(ctx, &MiddlewareError::from_panic(payload)),
        }
    }

    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, MiddlewareResult>
            + Send
            + 'a,
    {
        let mut next = Next::handler(handler);
        for middleware in self.stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next
    }

    /// Returns the names of all stages, outermost first.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|mw| mw.name()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Builder for constructing a [`Pipeline`].
///
/// Stages run in the order they are added. [`crate::build_pipeline`] adds
/// them in [`Stage::all`] order; use this directly only for custom chains.
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    #[must_use]
    pub fn add_stage<M: Middleware>(mut self, middleware: M) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Appends an already shared stage.
    #[must_use]
    pub fn add_boxed_stage(mut self, middleware: BoxedMiddleware) -> Self {
        self.stages.push(middleware);
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

/// The configurable stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Cross-origin headers and pre-flight answers.
    Cors,
    /// Response compression.
    Gzip,
    /// Signed cookie session.
    Session,
    /// Host header validation.
    TrustedHost,
    /// Fault to 500 conversion.
    ErrorHandling,
    /// Blacklist and budget enforcement.
    RateLimit,
    /// Handler deadline.
    Timeout,
}

impl Stage {
    /// Returns the stage name, as used in configuration keys.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cors => "cors",
            Self::Gzip => "gzip",
            Self::Session => "session",
            Self::TrustedHost => "trusted_host",
            Self::ErrorHandling => "error_handling",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
        }
    }

    /// Returns all stages in pipeline order.
    #[must_use]
    pub const fn all() -> [Stage; 7] {
        [
            Self::Cors,
            Self::Gzip,
            Self::Session,
            Self::TrustedHost,
            Self::ErrorHandling,
            Self::RateLimit,
            Self::Timeout,
        ]
    }

    /// Whether the stage is on when configuration does not mention it.
    #[must_use]
    pub const fn enabled_by_default(self) -> bool {
        !matches!(self, Self::RateLimit)
    }

    /// Looks a stage up by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().into_iter().find(|s| s.name() == name)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseExt;
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::{BodyExt, Full};

    struct Tag(&'static str);

    impl Middleware for Tag {
        fn name(&self) -> &'static str {
            self.0
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut MiddlewareContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, MiddlewareResult> {
            Box::pin(async move {
                let mut response = next.run(ctx, request).await?;
                response
                    .headers_mut()
                    .append("x-stage", http::HeaderValue::from_static(self.0));
                Ok(response)
            })
        }
    }

    fn request() -> Request {
        http::Request::builder()
            .uri("/")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn explode() -> MiddlewareResult {
        panic!("handler bug")
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_stage_order_and_names() {
        let names: Vec<_> = Stage::all().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            [
                "cors",
                "gzip",
                "session",
                "trusted_host",
                "error_handling",
                "rate_limit",
                "timeout"
            ]
        );
    }

    #[test]
    fn test_stage_defaults() {
        for stage in Stage::all() {
            assert_eq!(stage.enabled_by_default(), stage != Stage::RateLimit);
        }
    }

    #[test]
    fn test_stage_from_name() {
        assert_eq!(Stage::from_name("trusted_host"), Some(Stage::TrustedHost));
        assert_eq!(Stage::from_name("compression"), None);
    }

    #[tokio::test]
    async fn test_response_unwinds_inner_to_outer() {
        let pipeline = Pipeline::builder()
            .add_stage(Tag("outer"))
            .add_stage(Tag("inner"))
            .build();
        assert_eq!(pipeline.stage_names(), vec!["outer", "inner"]);

        let mut ctx = MiddlewareContext::new();
        let response = pipeline
            .process(&mut ctx, request(), |_ctx, _req| {
                Box::pin(async { Ok(Response::text(StatusCode::OK, "hi")) })
            })
            .await;

        let tags: Vec<_> = response.headers().get_all("x-stage").iter().collect();
        assert_eq!(tags, ["inner", "outer"]);
    }

    #[tokio::test]
    async fn test_uncaught_error_becomes_generic_500() {
        let pipeline = Pipeline::builder().add_stage(Tag("only")).build();
        let mut ctx = MiddlewareContext::new();

        let response = pipeline
            .process(&mut ctx, request(), |_ctx, _req| {
                Box::pin(async { Err(MiddlewareError::handler("database exploded")) })
            })
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"message": "An internal server error occurred."})
        );
    }

    #[tokio::test]
    async fn test_uncaught_panic_becomes_generic_500() {
        let pipeline = Pipeline::builder().build();
        let mut ctx = MiddlewareContext::new();

        let response = pipeline
            .process(&mut ctx, request(), |_ctx, _req| Box::pin(explode()))
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await["message"],
            "An internal server error occurred."
        );
    }
}
