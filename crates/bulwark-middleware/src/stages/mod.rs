//! The pipeline stages.
//!
//! Each stage has a `builder()` for programmatic use and a `from_settings`
//! constructor used by [`crate::build_pipeline`].

pub mod compression;
pub mod cors;
pub mod error_handling;
pub mod rate_limit;
pub mod session;
pub mod timeout;
pub mod trusted_host;

pub use compression::GzipMiddleware;
pub use cors::CorsMiddleware;
pub use error_handling::ErrorHandlingMiddleware;
pub use rate_limit::RateLimitMiddleware;
pub use session::{Session, SessionMiddleware};
pub use timeout::TimeoutMiddleware;
pub use trusted_host::TrustedHostMiddleware;
