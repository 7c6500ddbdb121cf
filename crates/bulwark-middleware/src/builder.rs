//! Assembles a [`Pipeline`] from configuration.

use crate::config::{MiddlewareConfig, MiddlewareSettings};
use crate::pipeline::{BoxedMiddleware, Pipeline, Stage};
use crate::stages::{
    CorsMiddleware, ErrorHandlingMiddleware, GzipMiddleware, RateLimitMiddleware,
    SessionMiddleware, TimeoutMiddleware, TrustedHostMiddleware,
};
use bulwark_limiter::RateLimiter;
use std::sync::Arc;

/// Builds the pipeline for the enabled stages, in [`Stage::all`] order.
///
/// `limiter` is shared with the rate-limit stage (when enabled) so that
/// callers can keep a handle for inspection and live limit updates.
#[must_use]
pub fn build_pipeline(
    config: &MiddlewareConfig,
    settings: &MiddlewareSettings,
    limiter: Arc<RateLimiter>,
) -> Pipeline {
    let pipeline = config
        .enabled_stages()
        .into_iter()
        .map(|stage| create_stage(stage, settings, &limiter))
        .fold(Pipeline::builder(), |builder, stage| {
            builder.add_boxed_stage(stage)
        })
        .build();

    tracing::info!(stages = ?pipeline.stage_names(), "middleware pipeline built");
    pipeline
}

fn create_stage(
    stage: Stage,
    settings: &MiddlewareSettings,
    limiter: &Arc<RateLimiter>,
) -> BoxedMiddleware {
    match stage {
        Stage::Cors => Arc::new(CorsMiddleware::from_settings(&settings.cors)),
        Stage::Gzip => Arc::new(GzipMiddleware::from_settings(&settings.gzip)),
        Stage::Session => Arc::new(SessionMiddleware::from_settings(&settings.session)),
        Stage::TrustedHost => {
            Arc::new(TrustedHostMiddleware::from_settings(&settings.trusted_host))
        }
        Stage::ErrorHandling => Arc::new(ErrorHandlingMiddleware::new()),
        Stage::RateLimit => Arc::new(RateLimitMiddleware::from_settings(
            Arc::clone(limiter),
            &settings.rate_limit,
        )),
        Stage::Timeout => Arc::new(TimeoutMiddleware::from_settings(&settings.timeout)),
    }
}
