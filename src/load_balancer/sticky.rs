//! Cookie-based session affinity.
//!
//! The cookie carries an opaque per-server value. When the pinned server is
//! gone or unavailable the pool picks another one and issues a new cookie;
//! the client never sees an error for it.

use axum::http::header::{HeaderMap, HeaderValue, COOKIE};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Sticky-session settings for one pool.
#[derive(Debug, Clone)]
pub struct StickySession {
    cookie_name: String,
}

impl StickySession {
    /// Use `cookie_name`, or derive a stable one from the service name.
    pub fn new(service: &str, cookie_name: Option<&str>) -> Self {
        let cookie_name = match cookie_name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => default_cookie_name(service),
        };
        Self { cookie_name }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Value of the affinity cookie in the request, if present.
    pub fn requested_value<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value.trim())
    }

    /// `Set-Cookie` header pinning the client to `cookie_value`.
    pub fn set_cookie(&self, cookie_value: &str) -> Option<HeaderValue> {
        HeaderValue::from_str(&format!(
            "{}={}; Path=/; HttpOnly",
            self.cookie_name, cookie_value
        ))
        .ok()
    }
}

fn default_cookie_name(service: &str) -> String {
    format!("_{}", URL_SAFE_NO_PAD.encode(service.as_bytes()))
}
