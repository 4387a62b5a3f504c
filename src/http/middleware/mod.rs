//! Interceptor-style middleware chain.
//!
//! # Data Flow
//! ```text
//! Chain::handle(req)
//!     → stage[0].handle(req, next) ─┐
//!         → stage[1].handle(req, next) ─┐
//!             ...                        │ each stage may short-circuit,
//!                 → endpoint.call(req)   │ call `next` once, or (retry)
//!             ← response                 │ call it several times
//!     ← response ◀───────────────────────┘
//! ```
//!
//! # Design Decisions
//! - One trait for every stage; `Next` is `Copy` so a stage can re-run the rest
//! - Chains are immutable and built once per reload
//! - A chain is itself an `Endpoint`, so router chains wrap service chains

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;

pub mod access_log;
pub mod compress;
pub mod errors;
pub mod factory;
pub mod headers;
pub mod metrics;
pub mod recovery;
pub mod redirect;
pub mod rewrite;
pub mod span;

/// A stage wrapping everything after it.
pub trait Middleware: Send + Sync {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response>;
}

/// The innermost handler of a chain.
pub trait Endpoint: Send + Sync {
    fn call(&self, req: Request<Body>) -> BoxFuture<'_, Response>;
}

/// The remainder of a chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub fn new(stages: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Endpoint) -> Self {
        Self { stages, endpoint }
    }

    /// Run the remaining stages and the endpoint.
    pub fn run(self, req: Request<Body>) -> BoxFuture<'a, Response> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.handle(
                req,
                Next {
                    stages: rest,
                    endpoint: self.endpoint,
                },
            ),
            None => self.endpoint.call(req),
        }
    }
}

/// An ordered list of stages in front of an endpoint.
#[derive(Clone)]
pub struct Chain {
    stages: Vec<Arc<dyn Middleware>>,
    endpoint: Arc<dyn Endpoint>,
}

impl Chain {
    pub fn new(stages: Vec<Arc<dyn Middleware>>, endpoint: Arc<dyn Endpoint>) -> Self {
        Self { stages, endpoint }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn handle(&self, req: Request<Body>) -> Response {
        Next::new(&self.stages, self.endpoint.as_ref()).run(req).await
    }
}

impl Endpoint for Chain {
    fn call(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        Box::pin(self.handle(req))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::Recorder;
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    struct Tag(&'static str);

    impl Middleware for Tag {
        fn handle<'a>(&'a self, mut req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                req.headers_mut().append("x-order", HeaderValue::from_static(self.0));
                let mut response = next.run(req).await;
                response.headers_mut().append("x-order", HeaderValue::from_static(self.0));
                response
            })
        }
    }

    struct Deny;

    impl Middleware for Deny {
        fn handle<'a>(&'a self, _req: Request<Body>, _next: Next<'a>) -> BoxFuture<'a, Response> {
            Box::pin(async { crate::http::response::status_response(StatusCode::FORBIDDEN) })
        }
    }

    #[tokio::test]
    async fn stages_run_in_order_around_the_endpoint() {
        let endpoint = Arc::new(Recorder::default());
        let chain = Chain::new(vec![Arc::new(Tag("outer")), Arc::new(Tag("inner"))], endpoint.clone());

        let response = chain.handle(Request::new(Body::empty())).await;

        let seen = endpoint.last().unwrap();
        let request_order: Vec<_> = seen.headers().get_all("x-order").iter().collect();
        assert_eq!(request_order, vec!["outer", "inner"]);

        let response_order: Vec<_> = response.headers().get_all("x-order").iter().collect();
        assert_eq!(response_order, vec!["inner", "outer"]);
    }

    #[tokio::test]
    async fn stages_can_short_circuit() {
        let endpoint = Arc::new(Recorder::default());
        let chain = Chain::new(vec![Arc::new(Deny)], endpoint.clone());

        let response = chain.handle(Request::new(Body::empty())).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn chains_nest_as_endpoints() {
        let endpoint = Arc::new(Recorder::with_status(StatusCode::ACCEPTED));
        let inner = Arc::new(Chain::new(vec![Arc::new(Tag("service"))], endpoint.clone()));
        let outer = Chain::new(vec![Arc::new(Tag("router"))], inner);

        let response = outer.handle(Request::new(Body::empty())).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(endpoint.calls(), 1);
    }
}
