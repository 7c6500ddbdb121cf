//! Middleware context types.
//!
//! The [`MiddlewareContext`] carries per-request state through the pipeline:
//! who the client is, what the request costs, and anything a stage wants to
//! hand to a later one.

use crate::types::RequestId;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Tokens charged for a request when the caller sets nothing else.
pub const DEFAULT_TOKENS: u64 = 1;

/// Context that flows through the middleware pipeline.
///
/// # Example
///
/// ```
/// use bulwark_middleware::context::MiddlewareContext;
///
/// let mut ctx = MiddlewareContext::new()
///     .with_client_ip("203.0.113.7".parse().unwrap())
///     .with_tokens(3);
///
/// assert_eq!(ctx.tokens(), 3);
/// assert_eq!(ctx.client_ip().unwrap().to_string(), "203.0.113.7");
/// ```
#[derive(Debug)]
pub struct MiddlewareContext {
    request_id: RequestId,

    /// Peer address of the connection, if known.
    client_ip: Option<IpAddr>,

    /// Approximate cost of the request.
    tokens: u64,

    /// Stage that answered without calling the rest of the chain.
    short_circuited_by: Option<&'static str>,

    started_at: Instant,

    /// Type-erased extension data.
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl MiddlewareContext {
    /// Creates a new context with a fresh request ID.
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_id(RequestId::new())
    }

    /// Creates a context with a specific request ID.
    #[must_use]
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self {
            request_id,
            client_ip: None,
            tokens: DEFAULT_TOKENS,
            short_circuited_by: None,
            started_at: Instant::now(),
            extensions: HashMap::new(),
        }
    }

    /// Sets the client address.
    #[must_use]
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Sets the token cost.
    #[must_use]
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = tokens;
        self
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the client address, if known.
    #[must_use]
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    /// Sets the client address.
    pub fn set_client_ip(&mut self, ip: IpAddr) {
        self.client_ip = Some(ip);
    }

    /// Returns the token cost of this request.
    #[must_use]
    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Sets the token cost of this request.
    pub fn set_tokens(&mut self, tokens: u64) {
        self.tokens = tokens;
    }

    /// Returns the stage that answered the request itself, if any.
    #[must_use]
    pub fn short_circuited_by(&self) -> Option<&'static str> {
        self.short_circuited_by
    }

    /// Records that `stage` answered without calling the rest of the chain.
    pub fn mark_short_circuit(&mut self, stage: &'static str) {
        self.short_circuited_by = Some(stage);
    }

    /// Returns when the request started processing.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stores a typed extension value, replacing any previous one.
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Retrieves a typed extension value for modification.
    pub fn get_extension_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Checks if an extension of the given type exists.
    #[must_use]
    pub fn has_extension<T: Send + Sync + 'static>(&self) -> bool {
        self.extensions.contains_key(&TypeId::of::<T>())
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let ctx = MiddlewareContext::new();
        assert_eq!(ctx.tokens(), DEFAULT_TOKENS);
        assert!(ctx.client_ip().is_none());
        assert!(ctx.short_circuited_by().is_none());
    }

    #[test]
    fn test_short_circuit_marker() {
        let mut ctx = MiddlewareContext::new();
        ctx.mark_short_circuit("rate_limit");
        assert_eq!(ctx.short_circuited_by(), Some("rate_limit"));
    }

    #[test]
    fn test_extensions() {
        #[derive(Debug, PartialEq)]
        struct Counter(u32);

        let mut ctx = MiddlewareContext::new();
        assert!(!ctx.has_extension::<Counter>());

        ctx.set_extension(Counter(1));
        ctx.get_extension_mut::<Counter>().unwrap().0 += 1;
        assert_eq!(ctx.get_extension::<Counter>(), Some(&Counter(2)));

        assert_eq!(ctx.remove_extension::<Counter>(), Some(Counter(2)));
        assert!(!ctx.has_extension::<Counter>());
    }

    #[test]
    fn test_elapsed_time() {
        let ctx = MiddlewareContext::new();
        std::thread::sleep(Duration::from_millis(10));
        assert!(ctx.elapsed() >= Duration::from_millis(10));
    }
}
