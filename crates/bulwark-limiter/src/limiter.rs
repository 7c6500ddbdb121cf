//! Fixed-window request and token limiter.
//!
//! ## Algorithm
//!
//! Two independent fixed windows are tracked: a 60 second window holding a
//! request count and a token sum, and a 24 hour window holding a request
//! count. At the start of every admission check, any window whose reset
//! instant has passed is zeroed and rescheduled for `now + window length`.
//!
//! A request is admitted only if all three ceilings still have room. On
//! admission every counter is incremented; on refusal nothing changes.
//!
//! Bursts that straddle a window boundary can admit up to twice the nominal
//! rate. This is the accepted cost of a fixed window.
//!
//! ## Concurrency
//!
//! Counters, ceilings and reset instants live behind one mutex, so each
//! check-and-increment is a single atomic step.

use crate::clock::{Clock, SystemClock};
use crate::limits::{LimitUpdate, Limits};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Length of the short window.
pub const MINUTE_WINDOW: Duration = Duration::from_secs(60);

/// Length of the long window.
pub const DAY_WINDOW: Duration = Duration::from_secs(86_400);

/// Which ceiling refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// `max_requests_per_minute` reached.
    RequestsPerMinute,
    /// The request's tokens would exceed `max_tokens_per_minute`.
    TokensPerMinute,
    /// `max_requests_per_day` reached.
    RequestsPerDay,
}

impl DenyReason {
    /// Short label used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestsPerMinute => "requests_per_minute",
            Self::TokensPerMinute => "tokens_per_minute",
            Self::RequestsPerDay => "requests_per_day",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter values right after an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Usage {
    /// Requests admitted in the current minute window.
    pub requests_this_minute: u64,
    /// Tokens admitted in the current minute window.
    pub tokens_this_minute: u64,
    /// Requests admitted in the current day window.
    pub requests_today: u64,
}

/// Outcome of [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request was admitted and counted.
    Admitted(Usage),
    /// The request was refused; counters are unchanged.
    Denied(DenyReason),
}

impl Admission {
    /// Returns true if the request was admitted.
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }
}

/// Point-in-time view of the limiter, served by the admin endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterSnapshot {
    /// Current ceilings.
    pub limits: Limits,
    /// Current counters.
    pub usage: Usage,
    /// Seconds until the minute window resets.
    pub minute_resets_in_secs: u64,
    /// Seconds until the day window resets.
    pub day_resets_in_secs: u64,
}

#[derive(Debug)]
struct LimiterState {
    limits: Limits,
    requests_this_minute: u64,
    tokens_this_minute: u64,
    requests_today: u64,
    minute_reset_at: Instant,
    day_reset_at: Instant,
}

impl LimiterState {
    fn new(limits: Limits, now: Instant) -> Self {
        Self {
            limits,
            requests_this_minute: 0,
            tokens_this_minute: 0,
            requests_today: 0,
            minute_reset_at: now + MINUTE_WINDOW,
            day_reset_at: now + DAY_WINDOW,
        }
    }

    fn roll_windows(&mut self, now: Instant) {
        if now >= self.minute_reset_at {
            self.requests_this_minute = 0;
            self.tokens_this_minute = 0;
            self.minute_reset_at = now + MINUTE_WINDOW;
            tracing::info!("minute window reset");
        }

        if now >= self.day_reset_at {
            self.requests_today = 0;
            self.day_reset_at = now + DAY_WINDOW;
            tracing::info!("day window reset");
        }
    }

    fn refusal(&self, tokens: u64) -> Option<DenyReason> {
        if self.requests_this_minute >= self.limits.max_requests_per_minute {
            return Some(DenyReason::RequestsPerMinute);
        }
        if self.tokens_this_minute.saturating_add(tokens) > self.limits.max_tokens_per_minute {
            return Some(DenyReason::TokensPerMinute);
        }
        if self.requests_today >= self.limits.max_requests_per_day {
            return Some(DenyReason::RequestsPerDay);
        }
        None
    }

    fn usage(&self) -> Usage {
        Usage {
            requests_this_minute: self.requests_this_minute,
            tokens_this_minute: self.tokens_this_minute,
            requests_today: self.requests_today,
        }
    }
}

/// Process-wide admission controller.
///
/// One instance is shared (behind an `Arc`) by every request handler.
///
/// # Example
///
/// ```
/// use bulwark_limiter::{Limits, RateLimiter};
///
/// let limiter = RateLimiter::new(Limits::new(2, 100, 100));
/// assert!(limiter.can_proceed(1));
/// assert!(limiter.can_proceed(1));
/// assert!(!limiter.can_proceed(1));
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
    clock: Arc<dyn Clock>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

impl RateLimiter {
    /// Creates a limiter with the given ceilings, empty IP lists and the
    /// system clock.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        RateLimiterBuilder::new().limits(limits).build()
    }

    /// Creates a new limiter builder.
    #[must_use]
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::new()
    }

    /// Checks and records a request costing `tokens`.
    ///
    /// Returns `true` and increments every counter if all ceilings have
    /// room. Returns `false` and leaves state untouched otherwise.
    pub fn can_proceed(&self, tokens: u64) -> bool {
        self.check(tokens).is_admitted()
    }

    /// Like [`can_proceed`](Self::can_proceed), but reports which ceiling
    /// refused the request.
    pub fn check(&self, tokens: u64) -> Admission {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.roll_windows(now);

        if let Some(reason) = state.refusal(tokens) {
            tracing::warn!(
                reason = %reason,
                tokens,
                requests_this_minute = state.requests_this_minute,
                tokens_this_minute = state.tokens_this_minute,
                requests_today = state.requests_today,
                "rate limit exceeded"
            );
            return Admission::Denied(reason);
        }

        state.requests_this_minute += 1;
        state.tokens_this_minute = state.tokens_this_minute.saturating_add(tokens);
        state.requests_today += 1;

        let usage = state.usage();
        tracing::info!(
            tokens,
            requests_this_minute = usage.requests_this_minute,
            tokens_this_minute = usage.tokens_this_minute,
            requests_today = usage.requests_today,
            "request admitted"
        );
        Admission::Admitted(usage)
    }

    /// Returns false only if `client_ip` is blacklisted.
    ///
    /// Whitelist membership is recorded in the logs but never changes the
    /// answer: unknown addresses are allowed too.
    pub fn is_ip_allowed(&self, client_ip: &str) -> bool {
        if self.blacklist.contains(client_ip) {
            tracing::warn!(client_ip, "blacklisted IP rejected");
            return false;
        }

        if self.whitelist.contains(client_ip) {
            tracing::debug!(client_ip, "whitelisted IP");
        } else {
            tracing::debug!(client_ip, "IP not listed, allowing");
        }
        true
    }

    /// Overwrites the ceilings present in `update`.
    ///
    /// Counters are left as they are. If a ceiling drops below its counter,
    /// requests are refused until the window resets.
    pub fn update_limits(&self, update: LimitUpdate) {
        let mut state = self.state.lock();
        state.limits.apply(&update);
        let limits = state.limits;
        drop(state);

        tracing::info!(
            max_requests_per_minute = limits.max_requests_per_minute,
            max_tokens_per_minute = limits.max_tokens_per_minute,
            max_requests_per_day = limits.max_requests_per_day,
            "rate limits updated"
        );
    }

    /// Returns the current ceilings.
    #[must_use]
    pub fn limits(&self) -> Limits {
        self.state.lock().limits
    }

    /// Returns ceilings, counters and time to each reset.
    ///
    /// Windows are not rolled here, so an expired window still shows its
    /// old counters until the next check.
    #[must_use]
    pub fn snapshot(&self) -> LimiterSnapshot {
        let now = self.clock.now();
        let state = self.state.lock();
        LimiterSnapshot {
            limits: state.limits,
            usage: state.usage(),
            minute_resets_in_secs: state.minute_reset_at.saturating_duration_since(now).as_secs(),
            day_resets_in_secs: state.day_reset_at.saturating_duration_since(now).as_secs(),
        }
    }

    /// Returns the whitelisted addresses.
    #[must_use]
    pub fn whitelist(&self) -> &HashSet<String> {
        &self.whitelist
    }

    /// Returns the blacklisted addresses.
    #[must_use]
    pub fn blacklist(&self) -> &HashSet<String> {
        &self.blacklist
    }
}

/// Builder for [`RateLimiter`].
#[derive(Debug)]
pub struct RateLimiterBuilder {
    limits: Limits,
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
    clock: Arc<dyn Clock>,
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterBuilder {
    /// Starts from default ceilings, empty lists and the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            limits: Limits::default(),
            whitelist: HashSet::new(),
            blacklist: HashSet::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the ceilings.
    #[must_use]
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the whitelist.
    #[must_use]
    pub fn whitelist<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist = ips.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the blacklist.
    #[must_use]
    pub fn blacklist<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blacklist = ips.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the time source.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the limiter. Both windows start now.
    #[must_use]
    pub fn build(self) -> RateLimiter {
        let now = self.clock.now();
        RateLimiter {
            state: Mutex::new(LimiterState::new(self.limits, now)),
            whitelist: self.whitelist,
            blacklist: self.blacklist,
            clock: self.clock,
        }
    }
}
