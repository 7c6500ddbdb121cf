//! Prometheus metrics.
//!
//! The recorder is installed without its own HTTP listener. The gateway
//! renders it on its admin endpoint instead.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `bulwark_admission_total` | Counter | `outcome` | Admission decisions |
//! | `bulwark_requests_total` | Counter | `status` | Completed requests |
//! | `bulwark_request_duration_seconds` | Histogram | - | Request latency |
//! | `bulwark_in_flight_requests` | Gauge | - | Requests being processed |

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use std::sync::OnceLock;
use std::time::Duration;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

/// Admission outcome label for admitted requests.
pub const OUTCOME_ADMITTED: &str = "admitted";

/// Admission outcome label for blacklisted clients.
pub const OUTCOME_BLOCKED_IP: &str = "blocked_ip";

/// Renders the installed recorder in Prometheus text format.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    /// Renders all metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Installs the Prometheus recorder and describes the Bulwark metrics.
///
/// Calling this more than once returns the handle from the first call.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if another recorder is already
/// installed.
pub fn init_metrics() -> TelemetryResult<MetricsHandle> {
    let _guard = INSTALL_LOCK.lock();

    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(MetricsHandle {
            handle: handle.clone(),
        });
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    let handle = METRICS_HANDLE.get_or_init(|| handle).clone();

    register_metric_descriptions();

    Ok(MetricsHandle { handle })
}

/// Renders metrics, or `None` if [`init_metrics`] has not run.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(
        "bulwark_admission_total",
        "Admission decisions by outcome"
    );
    describe_counter!(
        "bulwark_requests_total",
        "Total number of HTTP requests processed"
    );
    describe_histogram!(
        "bulwark_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_gauge!(
        "bulwark_in_flight_requests",
        "Number of HTTP requests currently being processed"
    );
}

/// Records one admission decision.
///
/// `outcome` is [`OUTCOME_ADMITTED`], [`OUTCOME_BLOCKED_IP`] or the name of
/// the ceiling that refused the request.
pub fn record_admission(outcome: &'static str) {
    counter!("bulwark_admission_total", "outcome" => outcome).increment(1);
}

/// Records a completed request.
pub fn record_request(status_code: u16, duration: Duration) {
    counter!(
        "bulwark_requests_total",
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!("bulwark_request_duration_seconds").record(duration.as_secs_f64());
}

/// Increments the in-flight requests gauge.
pub fn increment_in_flight() {
    gauge!("bulwark_in_flight_requests").increment(1.0);
}

/// Decrements the in-flight requests gauge.
pub fn decrement_in_flight() {
    gauge!("bulwark_in_flight_requests").decrement(1.0);
}
