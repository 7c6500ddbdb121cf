//! Core middleware trait and types.
//!
//! This module defines the [`Middleware`] trait that every pipeline stage
//! implements. A stage sees the request on the way in and the response (or
//! fault) on the way out, and may answer the request itself instead of
//! calling [`Next::run`].
//!
//! # Example
//!
//! ```ignore
//! use bulwark_middleware::{BoxFuture, Middleware, MiddlewareResult, Next, Request};
//! use bulwark_middleware::context::MiddlewareContext;
//!
//! struct Logging;
//!
//! impl Middleware for Logging {
//!     fn name(&self) -> &'static str {
//!         "logging"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut MiddlewareContext,
//!         request: Request,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, MiddlewareResult> {
//!         Box::pin(async move {
//!             tracing::info!(request_id = %ctx.request_id(), "in");
//!             let response = next.run(ctx, request).await?;
//!             tracing::info!(status = %response.status(), "out");
//!             Ok(response)
//!         })
//!     }
//! }
//! ```

use crate::context::MiddlewareContext;
use crate::error::MiddlewareResult;
use crate::types::Request;
use std::future::Future;
use std::pin::Pin;

/// A boxed future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A pipeline stage.
///
/// # Invariants
///
/// - A stage calls `next.run()` at most once; not calling it short-circuits
///   the rest of the chain
/// - `Ok` carries both pass-through and short-circuit responses; `Err` is
///   reserved for unexpected faults
pub trait Middleware: Send + Sync + 'static {
    /// Returns the name of this stage, used for logging and introspection.
    fn name(&self) -> &'static str;

    /// Processes the request through this stage.
    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, MiddlewareResult>;
}

/// The innermost request handler.
///
/// It may read or update the context synchronously, then returns a future
/// that owns everything it needs.
pub type Handler<'a> = Box<
    dyn FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, MiddlewareResult>
        + Send
        + 'a,
>;

/// Continuation to invoke the rest of the chain.
///
/// Consumed by [`run`](Next::run), so it can be called once at most.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    Handler(Handler<'a>),
}

impl<'a> Next<'a> {
    /// Creates a `Next` that invokes `middleware`, then `next`.
    pub(crate) fn new(middleware: &'a dyn Middleware, next: Next<'a>) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                next: Box::new(next),
            },
        }
    }

    /// Creates a terminal `Next` that invokes the handler.
    pub fn handler<F>(f: F) -> Self
    where
        F: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, MiddlewareResult>
            + Send
            + 'a,
    {
        Self {
            inner: NextInner::Handler(Box::new(f)),
        }
    }

    /// Invokes the next stage or the handler.
    pub async fn run(self, ctx: &mut MiddlewareContext, request: Request) -> MiddlewareResult {
        match self.inner {
            NextInner::Chain { middleware, next } => middleware.process(ctx, request, *next).await,
            NextInner::Handler(handler) => handler(ctx, request).await,
        }
    }
}

/// Chains `next` behind `middleware`. Lets stage tests drive a single
/// stage without building a pipeline.
pub fn chain<'a>(middleware: &'a dyn Middleware, next: Next<'a>) -> Next<'a> {
    Next::new(middleware, next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MiddlewareError;
    use crate::types::{Response, ResponseExt};
    use bytes::Bytes;
    use http::{Request as HttpRequest, StatusCode};
    use http_body_util::Full;

    struct Recorder {
        name: &'static str,
    }

    #[derive(Default)]
    struct Visits(Vec<&'static str>);

    impl Middleware for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut MiddlewareContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, MiddlewareResult> {
            Box::pin(async move {
                if !ctx.has_extension::<Visits>() {
                    ctx.set_extension(Visits::default());
                }
                if let Some(visits) = ctx.get_extension_mut::<Visits>() {
                    visits.0.push(self.name);
                }
                next.run(ctx, request).await
            })
        }
    }

    fn request() -> Request {
        HttpRequest::builder()
            .uri("/test")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_next_handler() {
        let mut ctx = MiddlewareContext::new();
        let next = Next::handler(|_ctx, _req| {
            Box::pin(async { Ok(Response::text(StatusCode::OK, "OK")) })
        });

        let response = next.run(&mut ctx, request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_chain_runs_outer_first() {
        let outer = Recorder { name: "outer" };
        let inner = Recorder { name: "inner" };
        let mut ctx = MiddlewareContext::new();

        let handler = Next::handler(|_ctx, _req| {
            Box::pin(async { Ok(Response::text(StatusCode::OK, "OK")) })
        });
        let next = chain(&outer, chain(&inner, handler));

        next.run(&mut ctx, request()).await.unwrap();
        assert_eq!(ctx.get_extension::<Visits>().unwrap().0, vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let stage = Recorder { name: "only" };
        let mut ctx = MiddlewareContext::new();
        let handler = Next::handler(|_ctx, _req| {
            Box::pin(async { Err(MiddlewareError::handler("boom")) })
        });

        let result = chain(&stage, handler).run(&mut ctx, request()).await;
        assert_eq!(result.unwrap_err().to_string(), "boom");
    }
}
