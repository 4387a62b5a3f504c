//! Upstream server abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server of a service
//! - Track in-flight requests (for dynamic round robin)
//! - Carry the server's weight and health status
//!
//! A server is identified by its normalized URL. Weight and health live in
//! atomics so they can change while requests are being balanced.

use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::uri::Authority;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use url::Url;

use crate::health::state::HealthStatus;
use crate::load_balancer::pool::PoolError;

/// A single upstream server.
#[derive(Debug)]
pub struct Server {
    /// Parsed base URL.
    pub url: Url,
    /// Normalized URL used as identity and metric label.
    key: String,
    /// `host:port` used when rewriting request URIs.
    authority: Authority,
    /// Sticky cookie value: the key, base64url-encoded.
    cookie_value: String,
    weight: AtomicU32,
    active_requests: AtomicUsize,
    /// Health, owned by the health checker.
    pub health: HealthStatus,
}

impl Server {
    /// Parse `url` and create a server. Only plain `http` upstreams are supported.
    pub fn new(url: &str, weight: u32) -> Result<Self, PoolError> {
        let parsed = Url::parse(url).map_err(|e| PoolError::InvalidServerUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "http" {
            return Err(PoolError::InvalidServerUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }
        let host = parsed.host_str().ok_or_else(|| PoolError::InvalidServerUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        })?;
        let port = parsed.port_or_known_default().unwrap_or(80);
        let authority = format!("{host}:{port}")
            .parse::<Authority>()
            .map_err(|e| PoolError::InvalidServerUrl {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let key = normalize_url(&parsed);
        let cookie_value = URL_SAFE_NO_PAD.encode(key.as_bytes());

        Ok(Self {
            url: parsed,
            key,
            authority,
            cookie_value,
            weight: AtomicU32::new(weight),
            active_requests: AtomicUsize::new(0),
            health: HealthStatus::new(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn cookie_value(&self) -> &str {
        &self.cookie_value
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    pub fn set_weight(&self, weight: u32) {
        self.weight.store(weight, Ordering::Relaxed);
    }

    /// Number of requests currently being served by this server.
    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::Relaxed)
    }

    /// Healthy (or not yet probed) and not drained through a zero weight.
    pub fn is_available(&self) -> bool {
        self.weight() > 0 && self.health.is_available()
    }

    /// Count a request against this server until the guard is dropped.
    pub fn track(self: &Arc<Self>) -> InFlightGuard {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            server: self.clone(),
        }
    }
}

/// Normalize a server URL so `http://a:80` and `http://a:80/` compare equal.
pub fn normalize_url(url: &Url) -> String {
    url.as_str().trim_end_matches('/').to_string()
}

/// A RAII guard that manages the in-flight request count.
#[derive(Debug)]
pub struct InFlightGuard {
    server: Arc<Server>,
}

impl Deref for InFlightGuard {
    type Target = Server;
    fn deref(&self) -> &Self::Target {
        &self.server
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.server.active_requests.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes() {
        let server = Server::new("http://127.0.0.1:9000/", 2).unwrap();
        assert_eq!(server.key(), "http://127.0.0.1:9000");
        assert_eq!(server.authority().as_str(), "127.0.0.1:9000");
        assert_eq!(server.weight(), 2);

        let default_port = Server::new("http://backend.local", 1).unwrap();
        assert_eq!(default_port.authority().as_str(), "backend.local:80");
    }

    #[test]
    fn rejects_unsupported_urls() {
        assert!(matches!(
            Server::new("https://127.0.0.1:9000", 1),
            Err(PoolError::InvalidServerUrl { .. })
        ));
        assert!(Server::new("not a url", 1).is_err());
    }

    #[test]
    fn guard_tracks_in_flight_requests() {
        let server = Arc::new(Server::new("http://127.0.0.1:9000", 1).unwrap());
        let first = server.track();
        let second = server.track();
        assert_eq!(server.active_requests(), 2);
        drop(first);
        assert_eq!(server.active_requests(), 1);
        drop(second);
        assert_eq!(server.active_requests(), 0);
    }

    #[test]
    fn zero_weight_drains_server() {
        let server = Server::new("http://127.0.0.1:9000", 1).unwrap();
        assert!(server.is_available());
        server.set_weight(0);
        assert!(!server.is_available());
    }

    #[test]
    fn cookie_value_is_stable() {
        let a = Server::new("http://127.0.0.1:9000", 1).unwrap();
        let b = Server::new("http://127.0.0.1:9000/", 5).unwrap();
        assert_eq!(a.cookie_value(), b.cookie_value());

        let decoded = URL_SAFE_NO_PAD.decode(a.cookie_value()).unwrap();
        assert_eq!(decoded, b"http://127.0.0.1:9000");
        assert!(a.cookie_value().chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
