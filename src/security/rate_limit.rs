//! Per-client rate limiting.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use dashmap::DashMap;
use futures_util::future::BoxFuture;

use crate::config::duration::parse_duration;
use crate::config::dynamic::RateLimitSpec;
use crate::http::middleware::{Middleware, Next};
use crate::http::request::peer_addr;
use crate::http::response::status_response;
use crate::observability::metrics;

/// Buckets idle for this long are dropped once the map grows large.
const IDLE_EVICTION: Duration = Duration::from_secs(300);
const EVICTION_THRESHOLD: usize = 10_000;

/// A simple token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token bucket per client IP.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    /// Tokens per second; `None` disables limiting.
    refill_rate: Option<f64>,
    capacity: f64,
    buckets: DashMap<IpAddr, TokenBucket>,
}

impl RateLimiter {
    pub fn from_spec(name: &str, spec: &RateLimitSpec) -> Result<Self, String> {
        let period = parse_duration(&spec.period).map_err(|e| format!("period: {e}"))?;
        if period.is_zero() && spec.average > 0 {
            return Err("period must be greater than zero".to_string());
        }
        let refill_rate = (spec.average > 0).then(|| spec.average as f64 / period.as_secs_f64());
        Ok(Self {
            name: name.to_string(),
            refill_rate,
            capacity: spec.burst.max(1) as f64,
            buckets: DashMap::new(),
        })
    }

    fn check(&self, client: IpAddr, now: Instant) -> bool {
        let Some(rate) = self.refill_rate else {
            return true;
        };
        if self.buckets.len() > EVICTION_THRESHOLD {
            self.buckets
                .retain(|_, bucket| now.saturating_duration_since(bucket.last_update) < IDLE_EVICTION);
        }
        self.buckets
            .entry(client)
            .or_insert_with(|| TokenBucket::new(self.capacity, now))
            .try_acquire(self.capacity, rate, now)
    }
}

impl Middleware for RateLimiter {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        let Some(client) = peer_addr(&req).map(|addr| addr.ip()) else {
            return next.run(req);
        };
        if self.check(client, Instant::now()) {
            next.run(req)
        } else {
            tracing::warn!(client = %client, middleware = %self.name, "Rate limit exceeded");
            metrics::record_rate_limited(&self.name);
            Box::pin(async { status_response(StatusCode::TOO_MANY_REQUESTS) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(average: u64, burst: u64, period: &str) -> RateLimiter {
        RateLimiter::from_spec(
            "limit@file",
            &RateLimitSpec {
                average,
                burst,
                period: period.to_string(),
            },
        )
        .unwrap()
    }

    #[test]
    fn burst_then_refill() {
        let limiter = limiter(10, 3, "1s");
        let client: IpAddr = "10.0.0.1".parse().unwrap();
        let start = Instant::now();

        assert!(limiter.check(client, start));
        assert!(limiter.check(client, start));
        assert!(limiter.check(client, start));
        assert!(!limiter.check(client, start));

        // 10 tokens per second: one token after 100ms.
        assert!(limiter.check(client, start + Duration::from_millis(110)));
        assert!(!limiter.check(client, start + Duration::from_millis(120)));
    }

    #[test]
    fn clients_are_independent() {
        let limiter = limiter(1, 1, "1m");
        let now = Instant::now();
        assert!(limiter.check("10.0.0.1".parse().unwrap(), now));
        assert!(!limiter.check("10.0.0.1".parse().unwrap(), now));
        assert!(limiter.check("10.0.0.2".parse().unwrap(), now));
    }

    #[test]
    fn zero_average_is_unlimited() {
        let limiter = limiter(0, 1, "1s");
        let now = Instant::now();
        for _ in 0..100 {
            assert!(limiter.check("10.0.0.1".parse().unwrap(), now));
        }
    }

    #[test]
    fn rejects_invalid_period() {
        let spec = RateLimitSpec {
            average: 5,
            burst: 1,
            period: "soon".into(),
        };
        assert!(RateLimiter::from_spec("x", &spec).is_err());
    }
}
