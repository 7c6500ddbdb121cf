//! Process-local admission control for Bulwark.
//!
//! This crate provides [`RateLimiter`], a fixed-window counter that caps
//! requests per minute, tokens per minute and requests per day for the whole
//! process, plus a static IP blacklist.
//!
//! # Example
//!
//! ```
//! use bulwark_limiter::{LimitUpdate, Limits, RateLimiter};
//!
//! let limiter = RateLimiter::builder()
//!     .limits(Limits::default())
//!     .blacklist(["203.0.113.7"])
//!     .build();
//!
//! assert!(!limiter.is_ip_allowed("203.0.113.7"));
//! assert!(limiter.can_proceed(1));
//!
//! limiter.update_limits(LimitUpdate::new().requests_per_minute(10));
//! assert_eq!(limiter.limits().max_requests_per_minute, 10);
//! ```
//!
//! State is never shared across processes or persisted across restarts.

pub mod clock;
pub mod limiter;
pub mod limits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{
    Admission, DenyReason, LimiterSnapshot, RateLimiter, RateLimiterBuilder, Usage, DAY_WINDOW,
    MINUTE_WINDOW,
};
pub use limits::{
    LimitUpdate, Limits, DEFAULT_MAX_REQUESTS_PER_DAY, DEFAULT_MAX_REQUESTS_PER_MINUTE,
    DEFAULT_MAX_TOKENS_PER_MINUTE,
};
