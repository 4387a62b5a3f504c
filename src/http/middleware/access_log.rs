//! Access log capture.
//!
//! Emits one event per request on the `access_log` target; formatting and
//! output are left to the subscriber.

use std::time::Instant;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::http::middleware::{Middleware, Next};
use crate::http::request::{peer_addr, request_id};
use crate::http::response::{RetryAttempts, UpstreamServer};

#[derive(Debug, Clone)]
pub struct AccessLog {
    router: String,
    service: String,
}

impl AccessLog {
    pub fn new(router: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            router: router.into(),
            service: service.into(),
        }
    }
}

impl Middleware for AccessLog {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let id = request_id(&req).to_string();
        let client = peer_addr(&req).map(|a| a.ip().to_string()).unwrap_or_default();

        Box::pin(async move {
            let response = next.run(req).await;
            let upstream = response
                .extensions()
                .get::<UpstreamServer>()
                .map(|s| s.0.as_str())
                .unwrap_or("-");
            let attempts = response
                .extensions()
                .get::<RetryAttempts>()
                .map_or(1, |a| a.0);

            tracing::info!(
                target: "access_log",
                request_id = %id,
                client = %client,
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                duration_ms = start.elapsed().as_millis() as u64,
                router = %self.router,
                service = %self.service,
                upstream = %upstream,
                attempts,
            );
            response
        })
    }
}
