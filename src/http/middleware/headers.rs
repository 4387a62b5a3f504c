//! Custom request and response headers.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::config::dynamic::HeadersSpec;
use crate::http::middleware::{Middleware, Next};

/// Header edits; `None` removes the header.
type Edits = Vec<(HeaderName, Option<HeaderValue>)>;

#[derive(Debug, Clone)]
pub struct CustomHeaders {
    request: Edits,
    response: Edits,
}

impl CustomHeaders {
    pub fn from_spec(spec: &HeadersSpec) -> Result<Self, String> {
        Ok(Self {
            request: compile(&spec.custom_request_headers)?,
            response: compile(&spec.custom_response_headers)?,
        })
    }
}

fn compile<'a>(headers: impl IntoIterator<Item = (&'a String, &'a String)>) -> Result<Edits, String> {
    headers
        .into_iter()
        .map(|(name, value)| {
            let name = HeaderName::try_from(name.as_str()).map_err(|e| format!("{name}: {e}"))?;
            let value = if value.is_empty() {
                None
            } else {
                Some(HeaderValue::from_str(value).map_err(|e| format!("{name}: {e}"))?)
            };
            Ok((name, value))
        })
        .collect()
}

fn apply(edits: &Edits, headers: &mut HeaderMap) {
    for (name, value) in edits {
        match value {
            Some(value) => {
                headers.insert(name.clone(), value.clone());
            }
            None => {
                headers.remove(name);
            }
        }
    }
}

impl Middleware for CustomHeaders {
    fn handle<'a>(&'a self, mut req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        apply(&self.request, req.headers_mut());
        Box::pin(async move {
            let mut response = next.run(req).await;
            apply(&self.response, response.headers_mut());
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::middleware::test_support::{run, Recorder};

    #[tokio::test]
    async fn sets_and_removes_headers() {
        let mut spec = HeadersSpec::default();
        spec.custom_request_headers.insert("X-Team".into(), "edge".into());
        spec.custom_request_headers.insert("X-Debug".into(), String::new());
        spec.custom_response_headers.insert("X-Frame-Options".into(), "DENY".into());
        let stage = CustomHeaders::from_spec(&spec).unwrap();

        let endpoint = Recorder::default();
        let req = Request::builder()
            .header("x-debug", "1")
            .body(Body::empty())
            .unwrap();
        let response = run(&stage, &endpoint, req).await;

        let seen = endpoint.last().unwrap();
        assert_eq!(seen.headers()["x-team"], "edge");
        assert!(seen.headers().get("x-debug").is_none());
        assert_eq!(response.headers()["x-frame-options"], "DENY");
    }

    #[test]
    fn rejects_invalid_header_names() {
        let mut spec = HeadersSpec::default();
        spec.custom_request_headers.insert("bad header".into(), "v".into());
        assert!(CustomHeaders::from_spec(&spec).is_err());
    }
}
