//! Static configuration schema.
//!
//! Static configuration is read once at startup: entry points, provider
//! settings, retry policy, timeouts and observability. Routing state lives
//! in the dynamic [`Configuration`](crate::config::dynamic::Configuration)
//! pushed by providers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration::parse_duration;

/// Root static configuration for the router.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticConfig {
    /// Named listening addresses.
    pub entry_points: BTreeMap<String, EntryPointConfig>,

    /// Entry points assigned to routers that do not name any.
    pub default_entry_points: Vec<String>,

    /// Provider settings and reload throttling.
    pub providers: ProvidersConfig,

    /// Retry policy; retries are disabled when absent.
    pub retry: Option<RetryConfig>,

    /// Shutdown behaviour.
    pub lifecycle: LifecycleConfig,

    /// Upstream transport timeouts.
    pub transport: TransportConfig,

    /// Logging settings.
    pub log: LogConfig,

    /// Metrics exporter settings.
    pub metrics: MetricsConfig,
}

impl Default for StaticConfig {
    fn default() -> Self {
        let mut entry_points = BTreeMap::new();
        entry_points.insert("web".to_string(), EntryPointConfig::default());
        Self {
            entry_points,
            default_entry_points: vec!["web".to_string()],
            providers: ProvidersConfig::default(),
            retry: None,
            lifecycle: LifecycleConfig::default(),
            transport: TransportConfig::default(),
            log: LogConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl StaticConfig {
    /// Minimum delay between two reloads triggered by the same provider.
    pub fn throttle_duration(&self) -> Duration {
        parse_duration(&self.providers.throttle_duration).unwrap_or(DEFAULT_THROTTLE)
    }

    /// How long in-flight requests may run once shutdown starts.
    pub fn grace_timeout(&self) -> Duration {
        parse_duration(&self.lifecycle.grace_timeout).unwrap_or(DEFAULT_GRACE_TIMEOUT)
    }
}

const DEFAULT_THROTTLE: Duration = Duration::from_secs(2);
const DEFAULT_GRACE_TIMEOUT: Duration = Duration::from_secs(10);

/// A single listening address.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EntryPointConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub address: String,

    /// Optional TLS termination.
    pub tls: Option<TlsConfig>,

    /// Which peers may set X-Forwarded-* headers.
    pub forwarded_headers: ForwardedHeadersConfig,
}

impl Default for EntryPointConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".to_string(),
            tls: None,
            forwarded_headers: ForwardedHeadersConfig::default(),
        }
    }
}

/// TLS configuration for an entry point.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Trust settings for client-supplied forwarding headers.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardedHeadersConfig {
    /// Peers (IPs or CIDR ranges) whose X-Forwarded-* headers are kept.
    pub trusted_ips: Vec<String>,

    /// Trust every peer.
    pub insecure: bool,
}

/// Provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Per-provider reload throttle (e.g., "2s").
    pub throttle_duration: String,

    /// File provider, disabled when absent.
    pub file: Option<FileProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            throttle_duration: "2s".to_string(),
            file: None,
        }
    }
}

/// File provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileProviderConfig {
    /// Path of the dynamic configuration file (TOML, or JSON with a `.json` extension).
    pub path: PathBuf,

    /// Reload when the file changes.
    #[serde(default = "default_watch")]
    pub watch: bool,
}

fn default_watch() -> bool {
    true
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per request; defaults to the number of servers.
    pub attempts: Option<u32>,

    /// Base delay before the second attempt, doubled afterwards.
    pub initial_interval: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: None,
            initial_interval: "0s".to_string(),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Grace period for in-flight requests during shutdown.
    pub grace_timeout: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_timeout: "10s".to_string(),
        }
    }
}

/// Upstream transport timeouts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// TCP connect timeout.
    pub dial_timeout: String,

    /// Time to wait for response headers ("0s" = no limit).
    pub response_header_timeout: String,

    /// How long idle upstream connections stay pooled.
    pub idle_conn_timeout: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            dial_timeout: "30s".to_string(),
            response_header_timeout: "0s".to_string(),
            idle_conn_timeout: "90s".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus exporter.
    pub enabled: bool,

    /// Exporter bind address.
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0:9090".to_string(),
        }
    }
}
