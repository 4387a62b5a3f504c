//! Response helpers and request-path failure classification.
//!
//! # Responsibilities
//! - Build terse status responses (no internal detail leaks to clients)
//! - Tag responses with what happened upstream, for retry, circuit
//!   breaker, metrics and access log stages further out in the chain
//! - Keep RAII guards alive until a streamed body is finished

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::StatusCode;
use axum::response::Response;
use hyper::body::{Body as HttpBody, Frame, SizeHint};

/// A plain response whose body is the canonical reason phrase.
pub fn status_response(status: StatusCode) -> Response {
    let mut response = Response::new(Body::from(status.canonical_reason().unwrap_or("")));
    *response.status_mut() = status;
    response
}

/// Why no upstream response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFailure {
    /// Connection refused, reset, or closed before a response.
    Network,
    /// No response headers within the transport timeout.
    Timeout,
    /// The pool had no available server.
    NoServer,
    /// The circuit breaker short-circuited the request.
    CircuitOpen,
    /// The max-connections limit was reached.
    Overloaded,
}

impl UpstreamFailure {
    /// Only transport failures are worth another server.
    pub fn is_retryable(self) -> bool {
        matches!(self, UpstreamFailure::Network | UpstreamFailure::Timeout)
    }

    pub fn status(self) -> StatusCode {
        match self {
            UpstreamFailure::Network => StatusCode::BAD_GATEWAY,
            UpstreamFailure::Timeout => StatusCode::GATEWAY_TIMEOUT,
            UpstreamFailure::NoServer
            | UpstreamFailure::CircuitOpen
            | UpstreamFailure::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Status response tagged with this failure.
    pub fn into_response(self) -> Response {
        let mut response = status_response(self.status());
        response.extensions_mut().insert(self);
        response
    }
}

/// Server (normalized URL) that handled, or failed, the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamServer(pub String);

/// Number of attempts the retry stage made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempts(pub u32);

/// Servers a retry wants the forwarder to avoid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludedServers(pub Vec<String>);

/// Wrap `body` so that `guard` is dropped only once the body is.
pub fn with_guard<G>(body: Body, guard: G) -> Body
where
    G: Send + Unpin + 'static,
{
    Body::new(GuardedBody { inner: body, _guard: guard })
}

struct GuardedBody<G> {
    inner: Body,
    _guard: G,
}

impl<G: Unpin> HttpBody for GuardedBody<G> {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
