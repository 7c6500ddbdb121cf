//! # Bulwark Gateway
//!
//! HTTP front end for the Bulwark admission pipeline. It accepts
//! connections, runs every request through the configured stages and
//! forwards admitted requests to a single upstream service.
//!
//! ```text
//! client ──► GatewayServer ──► Pipeline (cors … rate_limit, timeout) ──► UpstreamClient ──► upstream
//!                 │
//!                 └──► /_bulwark/* (health, ready, metrics, limits)
//! ```
//!
//! The `bulwark` binary wraps [`GatewayServer`] with configuration loading
//! and logging setup.

pub mod admin;
pub mod error;
pub mod server;
pub mod shutdown;
pub mod upstream;

pub use admin::{AdminEndpoints, HealthStatus, ADMIN_PREFIX};
pub use error::{GatewayError, GatewayResult};
pub use server::{GatewayServer, REQUEST_ID_HEADER};
pub use shutdown::ShutdownSignal;
pub use upstream::UpstreamClient;

/// Gateway version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
