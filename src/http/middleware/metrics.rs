//! Per-router request metrics.

use std::time::Instant;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::http::middleware::{Middleware, Next};
use crate::observability::metrics;

#[derive(Debug, Clone)]
pub struct RequestMetrics {
    router: String,
}

impl RequestMetrics {
    pub fn new(router: impl Into<String>) -> Self {
        Self {
            router: router.into(),
        }
    }
}

impl Middleware for RequestMetrics {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        let start = Instant::now();
        let method = req.method().clone();
        Box::pin(async move {
            let response = next.run(req).await;
            metrics::record_request(&self.router, method.as_str(), response.status().as_u16(), start);
            response
        })
    }
}
