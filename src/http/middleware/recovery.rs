//! Panic recovery, the outermost stage of every router chain.

use std::panic::AssertUnwindSafe;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::http::middleware::{Middleware, Next};
use crate::http::response::status_response;

/// Turns a panic anywhere in the chain into a 500.
#[derive(Debug, Clone, Default)]
pub struct Recovery {
    router: String,
}

impl Recovery {
    pub fn new(router: impl Into<String>) -> Self {
        Self {
            router: router.into(),
        }
    }
}

impl Middleware for Recovery {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            match AssertUnwindSafe(next.run(req)).catch_unwind().await {
                Ok(response) => response,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(router = %self.router, panic = %message, "Recovered from panic in request handler");
                    status_response(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        })
    }
}
