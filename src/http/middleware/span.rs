//! Per-request tracing span.

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;
use tracing::Instrument;

use crate::http::middleware::{Middleware, Next};
use crate::http::request::request_id;

/// Runs the rest of the chain inside a `request` span.
#[derive(Debug, Clone)]
pub struct RequestSpan {
    router: String,
}

impl RequestSpan {
    pub fn new(router: impl Into<String>) -> Self {
        Self {
            router: router.into(),
        }
    }
}

impl Middleware for RequestSpan {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        let span = tracing::info_span!(
            "request",
            router = %self.router,
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id(&req),
        );
        Box::pin(next.run(req).instrument(span))
    }
}
