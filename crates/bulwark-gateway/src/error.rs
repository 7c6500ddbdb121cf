//! Gateway error types.

use bulwark_config::ConfigError;
use bulwark_telemetry::TelemetryError;
use thiserror::Error;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors that stop the gateway from starting or serving.
///
/// Per-request problems never surface here; the pipeline turns them into
/// responses.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The upstream client could not be built or a forward failed.
    #[error("upstream error: {message}")]
    Upstream {
        /// What went wrong.
        message: String,
    },

    /// Metrics or logging could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Creates an upstream error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Creates a bind error.
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }
}
