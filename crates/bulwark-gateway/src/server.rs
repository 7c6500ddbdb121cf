//! Gateway HTTP server.
//!
//! One Tokio task per connection, HTTP/1.1 via Hyper. Every request that is
//! not an internal endpoint runs through the admission pipeline with the
//! upstream proxy as its handler. Internal endpoints go through a shorter
//! guard pipeline: the trusted-host check when enabled, then the blacklist.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bulwark_config::BulwarkConfig;
use bulwark_limiter::RateLimiter;
use bulwark_middleware::stages::{RateLimitMiddleware, TrustedHostMiddleware};
use bulwark_middleware::{
    build_pipeline, BoxFuture, MiddlewareContext, MiddlewareError, MiddlewareResult, Pipeline,
    Request, RequestId, Response, ResponseExt,
};
use bulwark_telemetry::metrics;
use http::{HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn, Instrument};

use crate::admin::AdminEndpoints;
use crate::error::{GatewayError, GatewayResult};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};
use crate::upstream::UpstreamClient;

/// Response header carrying the request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Admission-control gateway in front of one upstream.
///
/// # Example
///
/// ```rust,no_run
/// use bulwark_config::BulwarkConfig;
/// use bulwark_gateway::GatewayServer;
///
/// # async fn example() -> bulwark_gateway::GatewayResult<()> {
/// let server = GatewayServer::new(BulwarkConfig::default())?;
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct GatewayServer {
    state: Arc<GatewayState>,
}

struct GatewayState {
    config: BulwarkConfig,
    limiter: Arc<RateLimiter>,
    pipeline: Pipeline,
    admin_guard: Pipeline,
    upstream: UpstreamClient,
    admin: Arc<AdminEndpoints>,
}

impl GatewayServer {
    /// Validates `config` and builds the limiter, pipeline, upstream client
    /// and metrics recorder.
    pub fn new(config: BulwarkConfig) -> GatewayResult<Self> {
        config.validate()?;

        let limiter = Arc::new(
            RateLimiter::builder()
                .limits(config.limits.limits())
                .whitelist(config.limits.whitelist.clone())
                .blacklist(config.limits.blacklist.clone())
                .build(),
        );
        let pipeline = build_pipeline(
            &config.middleware,
            &config.middleware_settings(),
            Arc::clone(&limiter),
        );
        let admin_guard = build_admin_guard(&config, Arc::clone(&limiter));
        let upstream = UpstreamClient::new(&config.upstream)?;
        let admin = Arc::new(AdminEndpoints::new(&config.admin, Arc::clone(&limiter)));
        metrics::init_metrics()?;

        Ok(Self {
            state: Arc::new(GatewayState {
                config,
                limiter,
                pipeline,
                admin_guard,
                upstream,
                admin,
            }),
        })
    }

    /// The shared limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.state.limiter
    }

    /// The admission pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.state.pipeline
    }

    /// The pipeline internal endpoints run behind.
    pub fn admin_guard(&self) -> &Pipeline {
        &self.state.admin_guard
    }

    /// The configuration the gateway was built from.
    pub fn config(&self) -> &BulwarkConfig {
        &self.state.config
    }

    /// Serves until SIGINT or SIGTERM.
    pub async fn run(self) -> GatewayResult<()> {
        self.run_with_shutdown(ShutdownSignal::with_os_signals())
            .await
    }

    /// Binds `server.http_addr` and serves until `shutdown` triggers.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> GatewayResult<()> {
        let addr = self.state.config.server.http_addr.clone();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| GatewayError::bind(addr, e))?;
        self.serve(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` triggers, then
    /// waits up to `server.shutdown_timeout_secs` for open connections.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> GatewayResult<()> {
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            upstream = %self.state.upstream.base_url(),
            stages = ?self.state.pipeline.stage_names(),
            "Bulwark gateway listening"
        );

        let tracker = ConnectionTracker::new();
        self.state.admin.set_ready(true);

        loop {
            let (stream, peer_addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
                () = shutdown.recv() => break,
            };

            let token = tracker.acquire();
            let state = Arc::clone(&self.state);
            let shutdown = shutdown.clone();

            tokio::spawn(async move {
                let _token = token;
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { Ok::<_, Infallible>(state.handle_request(req, peer_addr).await) }
                });

                let conn = http1::Builder::new().serve_connection(io, service);
                tokio::pin!(conn);

                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(e) = result {
                            debug!(error = %e, peer = %peer_addr, "connection error");
                        }
                    }
                    () = shutdown.recv() => {
                        conn.as_mut().graceful_shutdown();
                        if let Err(e) = conn.await {
                            debug!(error = %e, peer = %peer_addr, "connection error during shutdown");
                        }
                    }
                }
            });
        }

        self.state.admin.set_ready(false);
        let timeout = Duration::from_secs(self.state.config.server.shutdown_timeout_secs);
        info!(
            active_connections = tracker.active_connections(),
            timeout_secs = timeout.as_secs(),
            "shutting down"
        );

        if tokio::time::timeout(timeout, tracker.wait_idle()).await.is_err() {
            warn!(
                active_connections = tracker.active_connections(),
                "shutdown timeout elapsed with connections still open"
            );
        }

        info!("Bulwark gateway stopped");
        Ok(())
    }
}

impl GatewayState {
    async fn handle_request(&self, req: http::Request<Incoming>, peer_addr: SocketAddr) -> Response {
        let start = Instant::now();
        let request_id = RequestId::new();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %method,
            path = %path,
        );

        async move {
            metrics::increment_in_flight();
            let (mut response, short_circuited_by) =
                self.dispatch(req, request_id, peer_addr).await;
            metrics::decrement_in_flight();

            if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }

            let duration = start.elapsed();
            metrics::record_request(response.status().as_u16(), duration);
            info!(
                status = response.status().as_u16(),
                duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                client_ip = %peer_addr.ip(),
                short_circuited_by = short_circuited_by.unwrap_or("-"),
                "request completed"
            );
            response
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &self,
        req: http::Request<Incoming>,
        request_id: RequestId,
        peer_addr: SocketAddr,
    ) -> (Response, Option<&'static str>) {
        let (parts, body) = req.into_parts();
        let body = match Limited::new(body, self.config.server.max_body_bytes)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return (
                    Response::json_error(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large"),
                    None,
                );
            }
            Err(e) => {
                warn!(error = %e, "failed to read request body");
                return (
                    Response::json_error(StatusCode::BAD_REQUEST, "Failed to read request body"),
                    None,
                );
            }
        };
        let request = Request::from_parts(parts, Full::new(body));

        let mut ctx = MiddlewareContext::with_request_id(request_id)
            .with_client_ip(peer_addr.ip())
            .with_tokens(1);

        if AdminEndpoints::is_admin_path(request.uri().path()) {
            let admin = Arc::clone(&self.admin);
            let response = self
                .admin_guard
                .process(
                    &mut ctx,
                    request,
                    move |_ctx: &mut MiddlewareContext,
                          request: Request|
                          -> BoxFuture<'static, MiddlewareResult> {
                        Box::pin(async move { Ok(admin.handle(request).await) })
                    },
                )
                .await;
            return (response, ctx.short_circuited_by());
        }

        let upstream = self.upstream.clone();

        let response = self
            .pipeline
            .process(
                &mut ctx,
                request,
                move |_ctx: &mut MiddlewareContext,
                      request: Request|
                      -> BoxFuture<'static, MiddlewareResult> {
                    Box::pin(async move {
                        upstream
                            .forward(request)
                            .await
                            .map_err(|e| MiddlewareError::handler(e.to_string()))
                    })
                },
            )
            .await;

        (response, ctx.short_circuited_by())
    }
}

// Internal endpoints skip the budget but not the host allow-list or the
// blacklist.
fn build_admin_guard(config: &BulwarkConfig, limiter: Arc<RateLimiter>) -> Pipeline {
    let mut builder = Pipeline::builder();
    if config.middleware.trusted_host {
        builder = builder.add_stage(TrustedHostMiddleware::from_settings(&config.trusted_host));
    }
    builder
        .add_stage(
            RateLimitMiddleware::builder(limiter)
                .trust_forwarded_for(config.rate_limit.trust_forwarded_for)
                .blacklist_only(true)
                .build(),
        )
        .build()
}
