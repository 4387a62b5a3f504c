//! Request matching.
//!
//! # Responsibilities
//! - Evaluate compiled rule conditions against a request
//! - Canonicalize hosts (lowercase, no port, no trailing dot)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Host matching is case-insensitive (per HTTP spec)
//! - Path matching is case-sensitive
//! - Conditions are a closed enum; no dynamic dispatch on the hot path

use axum::http::{header::HOST, HeaderName, Method, Request};
use regex::Regex;

/// One compiled rule clause.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Any of the canonical host names.
    Host(Vec<String>),
    /// Any of the host patterns.
    HostRegexp(Vec<Regex>),
    /// Exact path, any of.
    Path(Vec<String>),
    /// Path prefix, any of.
    PathPrefix(Vec<String>),
    /// Header with exactly this value.
    Header { name: HeaderName, value: String },
    /// Header with a value matching the pattern.
    HeaderRegexp { name: HeaderName, regex: Regex },
    /// Any of the methods.
    Method(Vec<Method>),
}

impl Condition {
    fn matches<B>(&self, req: &Request<B>, host: &str) -> bool {
        match self {
            Condition::Host(hosts) => hosts.iter().any(|h| h == host),
            Condition::HostRegexp(patterns) => patterns.iter().any(|re| re.is_match(host)),
            Condition::Path(paths) => paths.iter().any(|p| p == req.uri().path()),
            Condition::PathPrefix(prefixes) => {
                prefixes.iter().any(|p| req.uri().path().starts_with(p.as_str()))
            }
            Condition::Header { name, value } => req
                .headers()
                .get_all(name)
                .iter()
                .any(|v| v.as_bytes() == value.as_bytes()),
            Condition::HeaderRegexp { name, regex } => req
                .headers()
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .any(|v| regex.is_match(v)),
            Condition::Method(methods) => methods.contains(req.method()),
        }
    }
}

/// All conditions of a rule; matches when every condition does.
#[derive(Debug, Clone, Default)]
pub struct RuleMatcher {
    conditions: Vec<Condition>,
}

impl RuleMatcher {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self { conditions }
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Returns true if the request satisfies every condition.
    pub fn matches<B>(&self, req: &Request<B>) -> bool {
        let host = request_host(req);
        self.conditions.iter().all(|c| c.matches(req, &host))
    }
}

/// Canonical host of a request, from the Host header or the URI authority.
pub fn request_host<B>(req: &Request<B>) -> String {
    req.headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().host())
        .map(canonical_host)
        .unwrap_or_default()
}

/// Lowercase, strip the port and a trailing dot.
pub fn canonical_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if host.starts_with('[') {
        // [v6]:port
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        }
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}
