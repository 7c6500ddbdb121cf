//! Limiter ceilings and partial updates.

use serde::{Deserialize, Serialize};

/// Default requests admitted per minute window.
pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: u64 = 5;

/// Default tokens admitted per minute window.
pub const DEFAULT_MAX_TOKENS_PER_MINUTE: u64 = 5;

/// Default requests admitted per day window.
pub const DEFAULT_MAX_REQUESTS_PER_DAY: u64 = 100;

/// The three admission ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    /// Requests admitted per minute window.
    #[serde(default = "default_requests_per_minute")]
    pub max_requests_per_minute: u64,

    /// Tokens admitted per minute window.
    #[serde(default = "default_tokens_per_minute")]
    pub max_tokens_per_minute: u64,

    /// Requests admitted per day window.
    #[serde(default = "default_requests_per_day")]
    pub max_requests_per_day: u64,
}

fn default_requests_per_minute() -> u64 {
    DEFAULT_MAX_REQUESTS_PER_MINUTE
}

fn default_tokens_per_minute() -> u64 {
    DEFAULT_MAX_TOKENS_PER_MINUTE
}

fn default_requests_per_day() -> u64 {
    DEFAULT_MAX_REQUESTS_PER_DAY
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
            max_tokens_per_minute: DEFAULT_MAX_TOKENS_PER_MINUTE,
            max_requests_per_day: DEFAULT_MAX_REQUESTS_PER_DAY,
        }
    }
}

impl Limits {
    /// Creates a set of ceilings.
    #[must_use]
    pub const fn new(requests_per_minute: u64, tokens_per_minute: u64, requests_per_day: u64) -> Self {
        Self {
            max_requests_per_minute: requests_per_minute,
            max_tokens_per_minute: tokens_per_minute,
            max_requests_per_day: requests_per_day,
        }
    }

    /// Overwrites every ceiling present in `update`.
    pub fn apply(&mut self, update: &LimitUpdate) {
        if let Some(v) = update.max_requests_per_minute {
            self.max_requests_per_minute = v;
        }
        if let Some(v) = update.max_tokens_per_minute {
            self.max_tokens_per_minute = v;
        }
        if let Some(v) = update.max_requests_per_day {
            self.max_requests_per_day = v;
        }
    }
}

/// A partial change to [`Limits`]. Absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitUpdate {
    /// New requests-per-minute ceiling.
    pub max_requests_per_minute: Option<u64>,

    /// New tokens-per-minute ceiling.
    pub max_tokens_per_minute: Option<u64>,

    /// New requests-per-day ceiling.
    pub max_requests_per_day: Option<u64>,
}

impl LimitUpdate {
    /// An update that changes nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the requests-per-minute ceiling.
    #[must_use]
    pub fn requests_per_minute(mut self, value: u64) -> Self {
        self.max_requests_per_minute = Some(value);
        self
    }

    /// Sets the tokens-per-minute ceiling.
    #[must_use]
    pub fn tokens_per_minute(mut self, value: u64) -> Self {
        self.max_tokens_per_minute = Some(value);
        self
    }

    /// Sets the requests-per-day ceiling.
    #[must_use]
    pub fn requests_per_day(mut self, value: u64) -> Self {
        self.max_requests_per_day = Some(value);
        self
    }

    /// Returns true when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.max_requests_per_minute.is_none()
            && self.max_tokens_per_minute.is_none()
            && self.max_requests_per_day.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = Limits::default();
        assert_eq!(limits.max_requests_per_minute, 5);
        assert_eq!(limits.max_tokens_per_minute, 5);
        assert_eq!(limits.max_requests_per_day, 100);
    }

    #[test]
    fn test_apply_partial_update() {
        let mut limits = Limits::default();
        limits.apply(&LimitUpdate::new().tokens_per_minute(1000));

        assert_eq!(limits.max_requests_per_minute, 5);
        assert_eq!(limits.max_tokens_per_minute, 1000);
        assert_eq!(limits.max_requests_per_day, 100);
    }

    #[test]
    fn test_empty_update_changes_nothing() {
        let mut limits = Limits::new(1, 2, 3);
        let update = LimitUpdate::new();
        assert!(update.is_empty());
        limits.apply(&update);
        assert_eq!(limits, Limits::new(1, 2, 3));
    }

    #[test]
    fn test_update_deserializes_missing_fields_as_none() {
        let update: LimitUpdate =
            serde_json::from_str(r#"{"max_requests_per_day": 7}"#).unwrap();
        assert_eq!(update.max_requests_per_day, Some(7));
        assert!(update.max_requests_per_minute.is_none());
        assert!(update.max_tokens_per_minute.is_none());
    }

    #[test]
    fn test_update_rejects_unknown_fields() {
        let result: Result<LimitUpdate, _> = serde_json::from_str(r#"{"rpm": 7}"#);
        assert!(result.is_err());
    }
}
