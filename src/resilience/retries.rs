//! Retry on transport failures.
//!
//! # Responsibilities
//! - Re-run the rest of the chain when the forwarder reports a network
//!   error or timeout
//! - Steer each new attempt away from servers that already failed
//! - Record the attempt count on the response
//!
//! # Design Decisions
//! - Application responses (any status code) are never retried
//! - Attempts default to the number of servers and never exceed it
//! - Bodies are replayed from memory; bodies that cannot be buffered
//!   get a single attempt
//! - Backoff starts at `initial_interval` (0 = immediate reselection)

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use hyper::body::Body as HttpBody;

use crate::http::middleware::{Middleware, Next};
use crate::http::response::{status_response, ExcludedServers, RetryAttempts, UpstreamFailure, UpstreamServer};
use crate::load_balancer::BackendPool;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Largest request body kept in memory for replay.
const MAX_REPLAY_BODY: usize = 1024 * 1024;
const MAX_BACKOFF: Duration = Duration::from_secs(10);

pub struct Retry {
    service: String,
    pool: Arc<BackendPool>,
    attempts: Option<u32>,
    initial_interval: Duration,
}

impl Retry {
    pub fn new(pool: Arc<BackendPool>, attempts: Option<u32>, initial_interval: Duration) -> Self {
        Self {
            service: pool.name().to_string(),
            pool,
            attempts,
            initial_interval,
        }
    }

    /// `min(configured, servers)`, at least one.
    pub fn max_attempts(&self) -> u32 {
        let servers = u32::try_from(self.pool.len()).unwrap_or(u32::MAX);
        self.attempts.unwrap_or(servers).min(servers).max(1)
    }

    async fn run<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> Response {
        let max_attempts = self.max_attempts();
        if max_attempts <= 1 {
            return tag(next.run(req).await, 1);
        }

        let (parts, body) = req.into_parts();
        let replayable =
            body.is_end_stream() || body.size_hint().exact().is_some_and(|n| n <= MAX_REPLAY_BODY as u64);
        if !replayable {
            return tag(next.run(Request::from_parts(parts, body)).await, 1);
        }
        let bytes = match to_bytes(body, MAX_REPLAY_BODY).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read request body");
                return status_response(StatusCode::BAD_REQUEST);
            }
        };

        let mut excluded: Vec<String> = Vec::new();
        let mut attempt = 1;
        loop {
            let mut req = Request::from_parts(parts.clone(), Body::from(bytes.clone()));
            if !excluded.is_empty() {
                req.extensions_mut().insert(ExcludedServers(excluded.clone()));
            }
            let response = next.run(req).await;

            let retryable = response
                .extensions()
                .get::<UpstreamFailure>()
                .is_some_and(|failure| failure.is_retryable());
            if !retryable || attempt >= max_attempts {
                return tag(response, attempt);
            }

            if let Some(UpstreamServer(server)) = response.extensions().get::<UpstreamServer>() {
                excluded.push(server.clone());
            }
            metrics::record_retry(&self.service);
            let delay = calculate_backoff(attempt, self.initial_interval, MAX_BACKOFF);
            tracing::debug!(
                service = %self.service,
                attempt,
                delay = ?delay,
                "Retrying request"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}

fn tag(mut response: Response, attempts: u32) -> Response {
    response.extensions_mut().insert(RetryAttempts(attempts));
    response
}

impl Middleware for Retry {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(self.run(req, next))
    }
}
