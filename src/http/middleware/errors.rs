//! Custom error bodies for selected status codes.

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, Request};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::config::dynamic::ErrorsSpec;
use crate::http::middleware::{Middleware, Next};

#[derive(Debug, Clone)]
pub struct ErrorPages {
    ranges: Vec<(u16, u16)>,
    body: String,
}

impl ErrorPages {
    pub fn from_spec(spec: &ErrorsSpec) -> Result<Self, String> {
        let ranges = spec
            .status
            .iter()
            .map(|entry| parse_range(entry).ok_or_else(|| format!("invalid status range {entry:?}")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            ranges,
            body: spec.body.clone(),
        })
    }

    fn covers(&self, status: u16) -> bool {
        self.ranges.iter().any(|(low, high)| (*low..=*high).contains(&status))
    }
}

fn parse_range(entry: &str) -> Option<(u16, u16)> {
    let entry = entry.trim();
    let (low, high) = entry.split_once('-').unwrap_or((entry, entry));
    let low: u16 = low.trim().parse().ok()?;
    let high: u16 = high.trim().parse().ok()?;
    (low <= high && (100..=599).contains(&low) && high <= 599).then_some((low, high))
}

impl Middleware for ErrorPages {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let response = next.run(req).await;
            if !self.covers(response.status().as_u16()) {
                return response;
            }

            let (mut parts, _) = response.into_parts();
            parts.headers.remove(CONTENT_LENGTH);
            parts
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
            Response::from_parts(parts, Body::from(self.body.clone()))
        })
    }
}
