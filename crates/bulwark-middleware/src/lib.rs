//! # Bulwark Middleware
//!
//! The admission-control request pipeline.
//!
//! Every request passes through a chain of stages before it reaches the
//! handler. Each stage is switched on or off by configuration, but the
//! order never changes:
//!
//! ```text
//! Request → CORS → Gzip → Session → TrustedHost → ErrorHandling → RateLimit → Timeout → Handler
//! ```
//!
//! | Stage | Short-circuit response |
//! |-------|------------------------|
//! | CORS | pre-flight `200 OK` / `400 Disallowed CORS ...` |
//! | Gzip | none |
//! | Session | none |
//! | Trusted host | `400 Invalid host header` |
//! | Error handling | `500 {"error": "<message>"}` on fault |
//! | Rate limit | `403 {"error": "IP address is not allowed"}`, `429 {"error": "Too many requests"}` |
//! | Timeout | `504 Request timed out` |
//!
//! Faults no stage caught become `500 {"message": "An internal server
//! error occurred."}` in [`Pipeline::process`].
//!
//! ## Example
//!
//! ```
//! use bulwark_limiter::RateLimiter;
//! use bulwark_middleware::{build_pipeline, MiddlewareConfig, MiddlewareSettings};
//! use std::sync::Arc;
//!
//! let config = MiddlewareConfig::from_flags([("rate_limit", true)]);
//! let limiter = Arc::new(RateLimiter::default());
//! let pipeline = build_pipeline(&config, &MiddlewareSettings::default(), limiter);
//!
//! assert_eq!(pipeline.stage_names()[5], "rate_limit");
//! ```

#![doc(html_root_url = "https://docs.rs/bulwark-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod builder;
pub mod config;
pub mod context;
pub mod error;
pub mod fallback;
pub mod middleware;
pub mod pipeline;
pub mod stages;
pub mod types;

pub use builder::build_pipeline;
pub use config::{MiddlewareConfig, MiddlewareSettings};
pub use context::MiddlewareContext;
pub use error::{MiddlewareError, MiddlewareResult};
pub use middleware::{chain, BoxFuture, Handler, Middleware, Next};
pub use pipeline::{Pipeline, PipelineBuilder, Stage};
pub use stages::Session;
pub use types::{Request, RequestId, Response, ResponseExt};
