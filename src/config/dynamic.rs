//! Dynamic configuration pushed by providers.
//!
//! A [`Configuration`] is an immutable snapshot: providers build a new one
//! for every change and the reload pipeline never mutates a published value.
//! Maps are ordered so that equality and iteration are deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One provider's view of routers, middlewares and services.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Configuration {
    pub routers: BTreeMap<String, RouterSpec>,
    pub middlewares: BTreeMap<String, MiddlewareSpec>,
    pub services: BTreeMap<String, ServiceSpec>,
    pub tls: TlsSpec,
}

impl Configuration {
    /// True when the configuration carries no routers, services or certificates.
    pub fn is_empty(&self) -> bool {
        self.routers.is_empty() && self.services.is_empty() && self.tls.certificates.is_empty()
    }
}

/// A rule bound to a service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RouterSpec {
    /// Rule expression, e.g. `Host:example.com;PathPrefix:/api`.
    pub rule: String,

    #[serde(default)]
    pub entry_points: Vec<String>,

    #[serde(default)]
    pub middlewares: Vec<String>,

    pub service: String,

    /// Explicit priority; 0 means "derive from the rule length".
    #[serde(default)]
    pub priority: i64,
}

/// A group of upstream servers behind one name.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceSpec {
    pub servers: Vec<ServerSpec>,
    pub load_balancer: LoadBalancerSpec,
    pub health_check: Option<HealthCheckSpec>,
    pub max_connections: Option<usize>,
    pub circuit_breaker: Option<CircuitBreakerSpec>,
    pub buffering: Option<BufferingSpec>,
}

impl ServiceSpec {
    /// True when `other` differs from `self` in its server list only.
    pub fn differs_only_in_servers(&self, other: &ServiceSpec) -> bool {
        self.load_balancer == other.load_balancer
            && self.health_check == other.health_check
            && self.max_connections == other.max_connections
            && self.circuit_breaker == other.circuit_breaker
            && self.buffering == other.buffering
    }
}

/// An upstream server.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerSpec {
    pub url: String,

    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Balancing method and affinity.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancerSpec {
    pub method: LoadBalancerMethod,
    pub sticky: Option<StickySpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum LoadBalancerMethod {
    /// Weighted round robin.
    #[default]
    #[serde(rename = "wrr")]
    WeightedRoundRobin,
    /// Prefers the server with the fewest in-flight requests.
    #[serde(rename = "drr")]
    DynamicRoundRobin,
}

/// Cookie-based session affinity.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StickySpec {
    pub cookie_name: Option<String>,
}

/// Active health check settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckSpec {
    pub scheme: Option<String>,
    pub path: String,
    pub port: Option<u16>,
    pub hostname: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub interval: String,
    pub timeout: String,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            scheme: None,
            path: "/health".to_string(),
            port: None,
            hostname: None,
            headers: BTreeMap::new(),
            interval: "30s".to_string(),
            timeout: "5s".to_string(),
        }
    }
}

/// Circuit breaker trip condition, e.g. `NetworkErrorRatio() > 0.5`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CircuitBreakerSpec {
    pub expression: String,
}

/// Request/response buffering limits (0 = unlimited).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferingSpec {
    pub max_request_body_bytes: u64,
    pub max_response_body_bytes: u64,
}

/// A configured middleware.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MiddlewareSpec {
    BasicAuth(BasicAuthSpec),
    Headers(HeadersSpec),
    IpWhiteList(IpWhiteListSpec),
    RedirectScheme(RedirectSchemeSpec),
    RateLimit(RateLimitSpec),
    Errors(ErrorsSpec),
    StripPrefix(StripPrefixSpec),
    AddPrefix(AddPrefixSpec),
    Compress(CompressSpec),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BasicAuthSpec {
    /// `user:password` entries.
    pub users: Vec<String>,
    pub realm: Option<String>,
    /// Drop the Authorization header before forwarding.
    pub remove_header: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeadersSpec {
    /// Headers set on the request; an empty value removes the header.
    pub custom_request_headers: BTreeMap<String, String>,
    /// Headers set on the response; an empty value removes the header.
    pub custom_response_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IpWhiteListSpec {
    pub source_range: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RedirectSchemeSpec {
    pub scheme: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitSpec {
    /// Requests allowed per period, per client IP (0 = unlimited).
    pub average: u64,
    pub burst: u64,
    pub period: String,
}

impl Default for RateLimitSpec {
    fn default() -> Self {
        Self {
            average: 0,
            burst: 1,
            period: "1s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ErrorsSpec {
    /// Status codes or ranges, e.g. `["500-599", "404"]`.
    pub status: Vec<String>,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StripPrefixSpec {
    pub prefixes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AddPrefixSpec {
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressSpec {
    /// Responses with a known size below this are sent as-is.
    pub min_response_body_bytes: u16,
    /// Content types (matched by prefix) that are never compressed.
    pub excluded_content_types: Vec<String>,
}

impl Default for CompressSpec {
    fn default() -> Self {
        Self {
            min_response_body_bytes: 1024,
            excluded_content_types: Vec::new(),
        }
    }
}

/// Certificates carried by a provider.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsSpec {
    pub certificates: Vec<CertificateSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
pub struct CertificateSpec {
    pub cert_file: String,
    pub key_file: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[routers.api]
rule = "Host:example.com;PathPrefix:/api"
middlewares = ["auth"]
service = "api"

[middlewares.auth.basic_auth]
users = ["admin:secret"]

[services.api]
servers = [{ url = "http://127.0.0.1:9000" }, { url = "http://127.0.0.1:9001", weight = 3 }]

[services.api.load_balancer]
method = "drr"

[services.api.health_check]
path = "/ping"
interval = "5s"
"#;

    #[test]
    fn parses_toml_configuration() {
        let config: Configuration = toml::from_str(SAMPLE).unwrap();

        let router = &config.routers["api"];
        assert_eq!(router.service, "api");
        assert!(router.entry_points.is_empty());
        assert_eq!(router.priority, 0);

        let service = &config.services["api"];
        assert_eq!(service.servers[0].weight, 1);
        assert_eq!(service.servers[1].weight, 3);
        assert_eq!(service.load_balancer.method, LoadBalancerMethod::DynamicRoundRobin);
        assert_eq!(service.health_check.as_ref().unwrap().timeout, "5s");

        assert!(matches!(
            config.middlewares["auth"],
            MiddlewareSpec::BasicAuth(ref auth) if auth.users == vec!["admin:secret".to_string()]
        ));
    }

    #[test]
    fn parses_compress_middleware() {
        let config: Configuration = toml::from_str(
            r#"
[middlewares.gzip.compress]
excluded_content_types = ["text/event-stream"]
"#,
        )
        .unwrap();
        match &config.middlewares["gzip"] {
            MiddlewareSpec::Compress(spec) => {
                assert_eq!(spec.min_response_body_bytes, 1024);
                assert_eq!(spec.excluded_content_types, vec!["text/event-stream".to_string()]);
            }
            other => panic!("unexpected middleware {other:?}"),
        }
    }

    #[test]
    fn empty_configuration_detection() {
        assert!(Configuration::default().is_empty());

        let mut only_middlewares = Configuration::default();
        only_middlewares.middlewares.insert(
            "strip".into(),
            MiddlewareSpec::StripPrefix(StripPrefixSpec { prefixes: vec!["/a".into()] }),
        );
        assert!(only_middlewares.is_empty());

        let config: Configuration = toml::from_str(SAMPLE).unwrap();
        assert!(!config.is_empty());
    }

    #[test]
    fn server_only_changes_are_detected() {
        let config: Configuration = toml::from_str(SAMPLE).unwrap();
        let original = config.services["api"].clone();

        let mut servers_changed = original.clone();
        servers_changed.servers.pop();
        assert!(original.differs_only_in_servers(&servers_changed));

        let mut method_changed = original.clone();
        method_changed.load_balancer.method = LoadBalancerMethod::WeightedRoundRobin;
        assert!(!original.differs_only_in_servers(&method_changed));
    }
}
