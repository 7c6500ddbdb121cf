//! Observability for Bulwark.
//!
//! - [`logging`]: `tracing-subscriber` setup with JSON or pretty output
//! - [`metrics`]: a Prometheus recorder plus helpers for the admission and
//!   request metrics every Bulwark component emits
//!
//! # Example
//!
//! ```rust,ignore
//! use bulwark_telemetry::{init_logging, init_metrics, LogConfig};
//!
//! init_logging(&LogConfig::development())?;
//! let metrics = init_metrics()?;
//! println!("{}", metrics.render());
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{init_metrics, MetricsHandle};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
