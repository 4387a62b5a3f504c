//! Upstream HTTP client.

use std::time::Duration;

use axum::body::Body;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::config::duration::parse_duration;
use crate::config::schema::TransportConfig;

/// Pooled HTTP/1.1 client shared by forwarders and health checkers.
pub type HttpClient = Client<HttpConnector, Body>;

/// Build a client honouring the dial and idle timeouts.
pub fn build_client(transport: &TransportConfig) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_nodelay(true);
    if let Some(dial) = non_zero(&transport.dial_timeout) {
        connector.set_connect_timeout(Some(dial));
    }

    let mut builder = Client::builder(TokioExecutor::new());
    if let Some(idle) = non_zero(&transport.idle_conn_timeout) {
        builder.pool_idle_timeout(idle);
    }
    builder.build(connector)
}

/// Response header timeout, `None` when unlimited.
pub fn response_header_timeout(transport: &TransportConfig) -> Option<Duration> {
    non_zero(&transport.response_header_timeout)
}

fn non_zero(value: &str) -> Option<Duration> {
    parse_duration(value).ok().filter(|d| !d.is_zero())
}
