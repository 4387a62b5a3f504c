//! Connection and body size limits.
//!
//! # Responsibilities
//! - Cap concurrent requests per service (503 when exceeded)
//! - Buffer request and response bodies up to a configured size
//!
//! # Design Decisions
//! - The connection permit lives as long as the response body
//! - Oversized requests get 413, oversized responses get 500
//! - A limit of 0 disables the corresponding check

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use tokio::sync::Semaphore;

use crate::config::dynamic::BufferingSpec;
use crate::http::middleware::{Middleware, Next};
use crate::http::response::{status_response, with_guard, UpstreamFailure};

/// Limits concurrent in-flight requests.
#[derive(Debug)]
pub struct MaxConnections {
    permits: Arc<Semaphore>,
}

impl MaxConnections {
    pub fn new(max: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max)),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Middleware for MaxConnections {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                tracing::debug!("Max connections reached");
                return UpstreamFailure::Overloaded.into_response();
            };
            let response = next.run(req).await;
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, with_guard(body, permit))
        })
    }
}

/// Reads bodies fully before passing them on.
#[derive(Debug, Clone)]
pub struct Buffering {
    max_request: usize,
    max_response: usize,
}

impl Buffering {
    pub fn from_spec(spec: &BufferingSpec) -> Self {
        Self {
            max_request: limit(spec.max_request_body_bytes),
            max_response: limit(spec.max_response_body_bytes),
        }
    }
}

fn limit(bytes: u64) -> usize {
    if bytes == 0 {
        usize::MAX
    } else {
        usize::try_from(bytes).unwrap_or(usize::MAX)
    }
}

impl Middleware for Buffering {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let bytes = match to_bytes(body, self.max_request).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!(error = %e, "Request body rejected");
                    return status_response(StatusCode::PAYLOAD_TOO_LARGE);
                }
            };
            let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;

            let (parts, body) = response.into_parts();
            match to_bytes(body, self.max_response).await {
                Ok(bytes) => Response::from_parts(parts, Body::from(bytes)),
                Err(e) => {
                    tracing::warn!(error = %e, "Response body exceeded buffer limit");
                    status_response(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        })
    }
}
