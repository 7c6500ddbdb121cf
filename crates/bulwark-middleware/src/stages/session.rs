//! Signed cookie sessions.
//!
//! The session is a JSON object kept entirely in a cookie:
//!
//! ```text
//! <base64url(json)>.<issued-at unix seconds>.<base64url(hmac-sha256)>
//! ```
//!
//! The signature covers everything before the last dot. A cookie with a bad
//! signature, bad encoding, or older than `max_age` is ignored and the
//! request starts with an empty session.
//!
//! The stage stores the [`Session`] in the context before calling the rest
//! of the chain. Handlers read and change it through
//! [`MiddlewareContext::get_extension_mut`]. On the way out a non-empty
//! session is re-signed into a `Set-Cookie` header, and a session that
//! arrived non-empty but was cleared gets an expiring cookie.

use crate::config::{SessionSettings, DEFAULT_SESSION_MAX_AGE_SECS};
use crate::context::MiddlewareContext;
use crate::error::MiddlewareResult;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::Request;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use http::{header, HeaderValue};
use serde_json::{Map, Value};
use sha2::Sha256;
use std::fmt::Write;

type HmacSha256 = Hmac<Sha256>;

const EXPIRED: &str = "expires=Thu, 01 Jan 1970 00:00:00 GMT";

/// Per-request session data.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    data: Map<String, Value>,
    initially_empty: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            data: Map::new(),
            initially_empty: true,
        }
    }
}

impl Session {
    /// Creates an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn loaded(data: Map<String, Value>) -> Self {
        Self {
            initially_empty: data.is_empty(),
            data,
        }
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Stores `value` under `key`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.data.insert(key.into(), value.into())
    }

    /// Removes `key`.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Removes everything. The cookie is expired on the way out.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Returns true if `key` is set.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the session holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if the request carried no valid session.
    #[must_use]
    pub fn initially_empty(&self) -> bool {
        self.initially_empty
    }

    /// Returns the raw entries.
    #[must_use]
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}

/// Session middleware.
#[derive(Clone)]
pub struct SessionMiddleware {
    key: Vec<u8>,
    cookie_name: String,
    max_age_secs: Option<u64>,
    path: String,
    same_site: String,
    https_only: bool,
}

impl std::fmt::Debug for SessionMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMiddleware")
            .field("cookie_name", &self.cookie_name)
            .field("max_age_secs", &self.max_age_secs)
            .field("path", &self.path)
            .field("same_site", &self.same_site)
            .field("https_only", &self.https_only)
            .finish_non_exhaustive()
    }
}

impl Default for SessionMiddleware {
    fn default() -> Self {
        SessionBuilder::new().build()
    }
}

/// Builder for [`SessionMiddleware`].
#[derive(Clone)]
pub struct SessionBuilder {
    key: Option<Vec<u8>>,
    cookie_name: String,
    max_age_secs: Option<u64>,
    path: String,
    same_site: String,
    https_only: bool,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Creates a builder with the default cookie attributes and no key.
    #[must_use]
    pub fn new() -> Self {
        Self {
            key: None,
            cookie_name: "session".to_string(),
            max_age_secs: Some(DEFAULT_SESSION_MAX_AGE_SECS),
            path: "/".to_string(),
            same_site: "lax".to_string(),
            https_only: false,
        }
    }

    /// Sets the signing key.
    #[must_use]
    pub fn secret_key(mut self, key: impl AsRef<[u8]>) -> Self {
        self.key = Some(key.as_ref().to_vec());
        self
    }

    /// Sets the cookie name.
    #[must_use]
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Sets the cookie lifetime. `None` makes a browser-session cookie.
    #[must_use]
    pub fn max_age_secs(mut self, max_age: Option<u64>) -> Self {
        self.max_age_secs = max_age;
        self
    }

    /// Sets the cookie path.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the `SameSite` attribute.
    #[must_use]
    pub fn same_site(mut self, same_site: impl Into<String>) -> Self {
        self.same_site = same_site.into().to_ascii_lowercase();
        self
    }

    /// Marks the cookie `Secure`.
    #[must_use]
    pub fn https_only(mut self, https_only: bool) -> Self {
        self.https_only = https_only;
        self
    }

    /// Builds the middleware. Without a key, a random one is generated.
    #[must_use]
    pub fn build(self) -> SessionMiddleware {
        let key = self.key.unwrap_or_else(|| {
            tracing::debug!("no session secret configured, using a random key");
            rand::random::<[u8; 32]>().to_vec()
        });
        SessionMiddleware {
            key,
            cookie_name: self.cookie_name,
            max_age_secs: self.max_age_secs,
            path: self.path,
            same_site: self.same_site,
            https_only: self.https_only,
        }
    }
}

impl SessionMiddleware {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Creates the stage from settings.
    #[must_use]
    pub fn from_settings(settings: &SessionSettings) -> Self {
        let mut builder = SessionBuilder::new()
            .cookie_name(settings.cookie_name.clone())
            .max_age_secs(settings.max_age_secs)
            .path(settings.path.clone())
            .same_site(settings.same_site.clone())
            .https_only(settings.https_only);
        if let Some(secret) = &settings.secret_key {
            builder = builder.secret_key(secret);
        }
        builder.build()
    }

    /// Returns the cookie name.
    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    fn signature(&self, message: &str) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(message.as_bytes());
        Some(mac)
    }

    /// Signs `data` into a cookie value.
    fn encode(&self, data: &Map<String, Value>, issued_at: i64) -> Option<String> {
        let json = serde_json::to_vec(data).ok()?;
        let message = format!("{}.{issued_at}", URL_SAFE_NO_PAD.encode(json));
        let tag = self.signature(&message)?.finalize().into_bytes();
        Some(format!("{message}.{}", URL_SAFE_NO_PAD.encode(tag)))
    }

    /// Verifies and decodes a cookie value. `None` for anything invalid or
    /// expired at `now`.
    fn decode(&self, value: &str, now: i64) -> Option<Map<String, Value>> {
        let (message, tag) = value.rsplit_once('.')?;
        let tag = URL_SAFE_NO_PAD.decode(tag).ok()?;
        self.signature(message)?.verify_slice(&tag).ok()?;

        let (payload, issued_at) = message.split_once('.')?;
        let issued_at: i64 = issued_at.parse().ok()?;
        if let Some(max_age) = self.max_age_secs {
            let max_age = i64::try_from(max_age).unwrap_or(i64::MAX);
            if now.saturating_sub(issued_at) > max_age {
                return None;
            }
        }

        let json = URL_SAFE_NO_PAD.decode(payload).ok()?;
        serde_json::from_slice(&json).ok()
    }

    fn cookie_value<'r>(&self, request: &'r Request) -> Option<&'r str> {
        request
            .headers()
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value)
    }

    fn load(&self, request: &Request, now: i64) -> Session {
        let Some(value) = self.cookie_value(request) else {
            return Session::new();
        };
        match self.decode(value, now) {
            Some(data) => Session::loaded(data),
            None => {
                tracing::debug!(cookie = %self.cookie_name, "ignoring invalid or expired session cookie");
                Session::new()
            }
        }
    }

    fn attributes(&self) -> String {
        let mut attrs = format!("path={}; ", self.path);
        if let Some(max_age) = self.max_age_secs {
            let _ = write!(attrs, "Max-Age={max_age}; ");
        }
        let _ = write!(attrs, "httponly; samesite={}", self.same_site);
        if self.https_only {
            attrs.push_str("; secure");
        }
        attrs
    }

    fn set_cookie(&self, session: &Session, now: i64) -> Option<HeaderValue> {
        let value = self.encode(session.data(), now)?;
        HeaderValue::from_str(&format!("{}={value}; {}", self.cookie_name, self.attributes())).ok()
    }

    fn clear_cookie(&self) -> Option<HeaderValue> {
        let mut cookie = format!(
            "{}=null; path={}; {EXPIRED}; httponly; samesite={}",
            self.cookie_name, self.path, self.same_site
        );
        if self.https_only {
            cookie.push_str("; secure");
        }
        HeaderValue::from_str(&cookie).ok()
    }
}

impl Middleware for SessionMiddleware {
    fn name(&self) -> &'static str {
        "session"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, MiddlewareResult> {
        Box::pin(async move {
            ctx.set_extension(self.load(&request, chrono::Utc::now().timestamp()));

            let result = next.run(ctx, request).await;
            let session = ctx.remove_extension::<Session>().unwrap_or_default();
            let mut response = result?;

            let cookie = if !session.is_empty() {
                self.set_cookie(&session, chrono::Utc::now().timestamp())
            } else if !session.initially_empty() {
                self.clear_cookie()
            } else {
                None
            };
            if let Some(cookie) = cookie {
                response.headers_mut().append(header::SET_COOKIE, cookie);
            }
            Ok(response)
        })
    }
}
