//! Expression-driven circuit breaker.
//!
//! # Behaviour
//! ```text
//! every request:
//!     evaluate expression over the rolling window
//!     true  → 503 without contacting any server (tripped)
//!     false → forward and record the outcome
//! ```
//!
//! # Design Decisions
//! - No timers: the breaker recovers on the first request after the
//!   expression turns false again
//! - Short-circuited requests are not recorded, so the window drains
//! - One breaker per router, so routers sharing a service trip independently

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::http::middleware::{Middleware, Next};
use crate::http::response::UpstreamFailure;
use crate::observability::metrics;
use crate::resilience::expression::{Expression, ExpressionError};
use crate::resilience::rolling::{Outcome, RollingWindow};

const BUCKET_WIDTH: Duration = Duration::from_secs(1);
const BUCKET_COUNT: usize = 10;

#[derive(Debug)]
pub struct CircuitBreaker {
    router: String,
    expression: Expression,
    window: Mutex<RollingWindow>,
    tripped: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(router: impl Into<String>, expression: &str) -> Result<Self, ExpressionError> {
        Ok(Self {
            router: router.into(),
            expression: Expression::parse(expression)?,
            window: Mutex::new(RollingWindow::new(BUCKET_WIDTH, BUCKET_COUNT, Instant::now())),
            tripped: AtomicBool::new(false),
        })
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Evaluate the expression and update the tripped flag.
    fn should_trip(&self, now: Instant) -> bool {
        let stats = self
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot_at(now);
        let trip = self.expression.evaluate(&stats);

        let was_tripped = self.tripped.swap(trip, Ordering::AcqRel);
        if trip && !was_tripped {
            tracing::warn!(
                router = %self.router,
                expression = %self.expression.source(),
                requests = stats.requests(),
                "Circuit breaker tripped"
            );
            metrics::record_circuit_breaker_trip(&self.router);
        } else if !trip && was_tripped {
            tracing::info!(router = %self.router, "Circuit breaker recovered");
        }
        trip
    }

    fn record(&self, now: Instant, outcome: Outcome) {
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_at(now, outcome);
    }
}

impl Middleware for CircuitBreaker {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let start = Instant::now();
            if self.should_trip(start) {
                return UpstreamFailure::CircuitOpen.into_response();
            }

            let response = next.run(req).await;
            let network_error = response
                .extensions()
                .get::<UpstreamFailure>()
                .is_some_and(|failure| failure.is_retryable());
            self.record(
                Instant::now(),
                Outcome {
                    status: response.status().as_u16(),
                    network_error,
                    latency: start.elapsed(),
                },
            );
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::middleware::test_support::{run, Recorder};
    use crate::http::middleware::Endpoint;
    use axum::http::StatusCode;

    struct Unreachable;

    impl Endpoint for Unreachable {
        fn call(&self, _req: Request<Body>) -> BoxFuture<'_, Response> {
            Box::pin(async { UpstreamFailure::Network.into_response() })
        }
    }

    #[tokio::test]
    async fn trips_on_network_errors() {
        let breaker = CircuitBreaker::new("api@file", "NetworkErrorRatio() > 0.5").unwrap();

        let first = run(&breaker, &Unreachable, Request::new(Body::empty())).await;
        assert_eq!(first.status(), StatusCode::BAD_GATEWAY);
        assert!(!breaker.is_tripped());

        let healthy = Recorder::default();
        let second = run(&breaker, &healthy, Request::new(Body::empty())).await;
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            second.extensions().get::<UpstreamFailure>(),
            Some(&UpstreamFailure::CircuitOpen)
        );
        assert!(breaker.is_tripped());
        assert_eq!(healthy.calls(), 0);
    }

    #[tokio::test]
    async fn recovers_once_window_clears() {
        let breaker = CircuitBreaker::new("api@file", "ResponseCodeRatio(500, 600, 0, 600) > 0.5").unwrap();
        let start = Instant::now();
        breaker.record(
            start,
            Outcome {
                status: 500,
                network_error: false,
                latency: Duration::from_millis(1),
            },
        );
        assert!(breaker.should_trip(start));
        assert!(!breaker.should_trip(start + Duration::from_secs(11)));
        assert!(!breaker.is_tripped());
    }

    #[test]
    fn rejects_invalid_expression() {
        assert!(CircuitBreaker::new("api@file", "NetworkErrorRatio(1) > 0").is_err());
    }
}
