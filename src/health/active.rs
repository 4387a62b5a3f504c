//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every server of one pool
//! - Update server health state based on results
//! - Publish transitions as logs and `backend_server_up` gauges

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue, HOST, USER_AGENT};
use axum::http::Request;
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::duration::parse_duration;
use crate::config::dynamic::HealthCheckSpec;
use crate::http::client::HttpClient;
use crate::load_balancer::{backend::Server, BackendPool};
use crate::observability::metrics;

/// Resolved probe settings.
#[derive(Debug, Clone)]
pub struct HealthCheckSettings {
    pub scheme: Option<String>,
    pub path: String,
    pub port: Option<u16>,
    pub hostname: Option<String>,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub interval: Duration,
    pub timeout: Duration,
}

impl HealthCheckSettings {
    /// Resolve a spec. Returns `None` when the interval is malformed or zero,
    /// which disables checking for the pool.
    pub fn from_spec(service: &str, spec: &HealthCheckSpec) -> Option<Self> {
        let interval = match parse_duration(&spec.interval) {
            Ok(interval) if !interval.is_zero() => interval,
            Ok(_) => {
                tracing::info!(service = %service, "Health check interval is zero, checks disabled");
                return None;
            }
            Err(e) => {
                tracing::warn!(service = %service, error = %e, "Health check disabled");
                return None;
            }
        };
        let timeout = parse_duration(&spec.timeout)
            .ok()
            .filter(|t| !t.is_zero())
            .unwrap_or(Duration::from_secs(5));

        let headers = spec
            .headers
            .iter()
            .filter_map(|(name, value)| {
                match (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
                    (Ok(name), Ok(value)) => Some((name, value)),
                    _ => {
                        tracing::warn!(service = %service, header = %name, "Ignoring invalid health check header");
                        None
                    }
                }
            })
            .collect();

        let path = if spec.path.starts_with('/') {
            spec.path.clone()
        } else {
            format!("/{}", spec.path)
        };

        Some(Self {
            scheme: spec.scheme.clone(),
            path,
            port: spec.port,
            hostname: spec.hostname.clone(),
            headers,
            interval,
            timeout,
        })
    }

    /// Probe URL for `server`.
    pub fn probe_url(&self, server: &Server) -> String {
        let scheme = self.scheme.as_deref().unwrap_or(server.url.scheme());
        let host = server.url.host_str().unwrap_or("localhost");
        let port = self
            .port
            .or_else(|| server.url.port_or_known_default())
            .unwrap_or(80);
        format!("{scheme}://{host}:{port}{}", self.path)
    }
}

/// Background prober for one pool.
pub struct HealthChecker {
    pool: Arc<BackendPool>,
    settings: HealthCheckSettings,
    client: HttpClient,
}

impl HealthChecker {
    pub fn new(pool: Arc<BackendPool>, settings: HealthCheckSettings, client: HttpClient) -> Self {
        Self {
            pool,
            settings,
            client,
        }
    }

    /// Run on a new task until `shutdown` fires or the handle is aborted.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            service = %self.pool.name(),
            interval = ?self.settings.interval,
            path = %self.settings.path,
            "Health checker starting"
        );

        // Spread the first probes of pools created by the same reload.
        let jitter_ms = fastrand::u64(0..=(self.settings.interval.as_millis() as u64 / 10));
        let start = time::Instant::now() + Duration::from_millis(jitter_ms);
        let mut ticker = time::interval_at(start, self.settings.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::debug!(service = %self.pool.name(), "Health checker received shutdown signal");
                    break;
                }
            }
        }
    }

    /// Probe every server once.
    pub async fn check_all(&self) {
        let servers = self.pool.servers();
        join_all(servers.iter().map(|server| self.check(server))).await;
    }

    async fn check(&self, server: &Arc<Server>) {
        let healthy = self.probe(server).await;

        if let Some(previous) = server.health.record(healthy) {
            if healthy {
                tracing::info!(service = %self.pool.name(), server = %server.key(), ?previous, "Server is healthy");
            } else {
                tracing::warn!(service = %self.pool.name(), server = %server.key(), ?previous, "Server is unhealthy");
            }
        }
        metrics::record_server_health(self.pool.name(), server.key(), healthy);
    }

    async fn probe(&self, server: &Server) -> bool {
        let url = self.settings.probe_url(server);
        let mut builder = Request::builder()
            .method("GET")
            .uri(&url)
            .header(USER_AGENT, "edge-router-health-check");
        if let Some(hostname) = &self.settings.hostname {
            builder = builder.header(HOST, hostname.as_str());
        }
        for (name, value) in &self.settings.headers {
            builder = builder.header(name, value);
        }
        let request = match builder.body(Body::empty()) {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(url = %url, error = %e, "Failed to build health check request");
                return false;
            }
        };

        match time::timeout(self.settings.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let status = response.status();
                let success = status.is_success() || status.is_redirection();
                if !success {
                    tracing::debug!(url = %url, status = %status, "Health check failed: status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::debug!(url = %url, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::debug!(url = %url, "Health check failed: timeout");
                false
            }
        }
    }
}
