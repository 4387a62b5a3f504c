//! Metrics collection and exposition.
//!
//! # Metrics
//! - `config_reloads_total{outcome}` (counter): applied reloads, `success` or `partial_failure`
//! - `config_reload_last_success_timestamp_seconds` (gauge)
//! - `backend_server_up{service,url}` (gauge): 1=healthy, 0=unhealthy
//! - `router_requests_total{router,code,method}` (counter)
//! - `router_request_duration_seconds{router}` (histogram)
//! - `service_retries_total{service}` (counter)
//! - `circuit_breaker_tripped_total{router}` (counter)
//! - `rate_limited_requests_total{middleware}` (counter)
//!
//! # Design Decisions
//! - The `metrics` facade is a no-op until an exporter is installed
//! - Histogram buckets tuned for typical web latencies

use std::net::SocketAddr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Install the Prometheus exporter and its HTTP listener on `addr`.
pub fn install_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full("router_request_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

/// Outcome of applying a merged configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Success,
    PartialFailure,
}

impl ReloadOutcome {
    fn as_str(self) -> &'static str {
        match self {
            ReloadOutcome::Success => "success",
            ReloadOutcome::PartialFailure => "partial_failure",
        }
    }
}

pub fn record_reload(outcome: ReloadOutcome) {
    counter!("config_reloads_total", "outcome" => outcome.as_str()).increment(1);
    if outcome == ReloadOutcome::Success {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        gauge!("config_reload_last_success_timestamp_seconds").set(now);
    }
}

pub fn record_server_health(service: &str, url: &str, up: bool) {
    gauge!(
        "backend_server_up",
        "service" => service.to_string(),
        "url" => url.to_string()
    )
    .set(if up { 1.0 } else { 0.0 });
}

pub fn record_request(router: &str, method: &str, status: u16, start: Instant) {
    counter!(
        "router_requests_total",
        "router" => router.to_string(),
        "code" => status.to_string(),
        "method" => method.to_string()
    )
    .increment(1);
    histogram!("router_request_duration_seconds", "router" => router.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(service: &str) {
    counter!("service_retries_total", "service" => service.to_string()).increment(1);
}

pub fn record_circuit_breaker_trip(router: &str) {
    counter!("circuit_breaker_tripped_total", "router" => router.to_string()).increment(1);
}

pub fn record_rate_limited(middleware: &str) {
    counter!("rate_limited_requests_total", "middleware" => middleware.to_string()).increment(1);
}
