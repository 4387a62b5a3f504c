//! Forwarding headers and hop-by-hop stripping.
//!
//! # Responsibilities
//! - Add X-Forwarded-For, X-Forwarded-Proto, X-Forwarded-Host, X-Real-Ip
//! - Strip hop-by-hop headers in both directions
//!
//! # Design Decisions
//! - Client-supplied X-Forwarded-* survive only when the direct peer is trusted
//! - Untrusted peers get their forwarding headers replaced, never merged
//! - Trust is configured per entry point (IPs or CIDR ranges)

use std::net::{IpAddr, SocketAddr};

use axum::http::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST};

use crate::config::schema::ForwardedHeadersConfig;
use crate::security::access_control::{IpRange, IpRangeError};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

const FORWARDING_HEADERS: [HeaderName; 5] = [
    X_FORWARDED_FOR,
    X_FORWARDED_PROTO,
    X_FORWARDED_HOST,
    X_FORWARDED_PORT,
    X_REAL_IP,
];

/// Headers that apply to a single connection and must not be forwarded.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Per-entry-point policy for forwarding headers.
#[derive(Debug, Clone)]
pub struct ForwardedHeaders {
    trusted: Vec<IpRange>,
    insecure: bool,
    scheme: &'static str,
    port: u16,
}

impl ForwardedHeaders {
    pub fn from_config(
        config: &ForwardedHeadersConfig,
        tls: bool,
        port: u16,
    ) -> Result<Self, IpRangeError> {
        let trusted = config
            .trusted_ips
            .iter()
            .map(|entry| entry.parse::<IpRange>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            trusted,
            insecure: config.insecure,
            scheme: if tls { "https" } else { "http" },
            port,
        })
    }

    pub fn is_trusted(&self, ip: IpAddr) -> bool {
        self.insecure || self.trusted.iter().any(|range| range.contains(ip))
    }

    /// Rewrite forwarding headers for a request received from `peer`.
    pub fn apply(&self, headers: &mut HeaderMap, peer: Option<SocketAddr>) {
        let trusted = peer.is_some_and(|p| self.is_trusted(p.ip()));
        if !trusted {
            for name in &FORWARDING_HEADERS {
                headers.remove(name);
            }
        }

        if let Some(peer) = peer {
            let ip = peer.ip().to_string();
            let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(existing) if !existing.trim().is_empty() => format!("{existing}, {ip}"),
                _ => ip.clone(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
                headers.insert(X_FORWARDED_FOR, value);
            }
            if !headers.contains_key(&X_REAL_IP) {
                if let Ok(value) = HeaderValue::from_str(&ip) {
                    headers.insert(X_REAL_IP, value);
                }
            }
        }

        if !headers.contains_key(&X_FORWARDED_PROTO) {
            headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(self.scheme));
        }
        if !headers.contains_key(&X_FORWARDED_PORT) {
            headers.insert(X_FORWARDED_PORT, HeaderValue::from(self.port));
        }
        if !headers.contains_key(&X_FORWARDED_HOST) {
            if let Some(host) = headers.get(HOST).cloned() {
                headers.insert(X_FORWARDED_HOST, host);
            }
        }
    }
}
