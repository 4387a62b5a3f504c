//! Scheme redirection (e.g. http → https).

use axum::body::Body;
use axum::http::header::LOCATION;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::config::dynamic::RedirectSchemeSpec;
use crate::http::middleware::{Middleware, Next};
use crate::http::response::status_response;
use crate::routing::matcher::request_host;
use crate::security::headers::X_FORWARDED_PROTO;

#[derive(Debug, Clone)]
pub struct RedirectScheme {
    scheme: String,
    port: Option<u16>,
    permanent: bool,
}

impl RedirectScheme {
    pub fn from_spec(spec: &RedirectSchemeSpec) -> Self {
        Self {
            scheme: spec.scheme.to_ascii_lowercase(),
            port: spec.port,
            permanent: spec.permanent,
        }
    }

    fn location<B>(&self, req: &Request<B>) -> String {
        let host = request_host(req);
        let port = match (self.port, self.scheme.as_str()) {
            (Some(443), "https") | (Some(80), "http") | (None, _) => String::new(),
            (Some(port), _) => format!(":{port}"),
        };
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("{}://{host}{port}{path_and_query}", self.scheme)
    }
}

impl Middleware for RedirectScheme {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        let current = req
            .headers()
            .get(X_FORWARDED_PROTO)
            .and_then(|v| v.to_str().ok())
            .or_else(|| req.uri().scheme_str())
            .unwrap_or("http")
            .to_ascii_lowercase();
        if current == self.scheme {
            return next.run(req);
        }

        let status = if self.permanent {
            StatusCode::MOVED_PERMANENTLY
        } else {
            StatusCode::FOUND
        };
        let mut response = status_response(status);
        match HeaderValue::from_str(&self.location(&req)) {
            Ok(location) => {
                response.headers_mut().insert(LOCATION, location);
            }
            Err(_) => return next.run(req),
        }
        Box::pin(async move { response })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::middleware::test_support::{run, Recorder};

    fn stage(port: Option<u16>, permanent: bool) -> RedirectScheme {
        RedirectScheme::from_spec(&RedirectSchemeSpec {
            scheme: "https".into(),
            port,
            permanent,
        })
    }

    #[tokio::test]
    async fn redirects_plain_http() {
        let endpoint = Recorder::default();
        let req = Request::builder()
            .uri("/login?next=/home")
            .header("host", "example.com:8080")
            .header("x-forwarded-proto", "http")
            .body(Body::empty())
            .unwrap();
        let response = run(&stage(Some(8443), true), &endpoint, req).await;

        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[LOCATION],
            "https://example.com:8443/login?next=/home"
        );
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn passes_requests_already_on_target_scheme() {
        let endpoint = Recorder::default();
        let req = Request::builder()
            .header("host", "example.com")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap();
        let response = run(&stage(None, false), &endpoint, req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(endpoint.calls(), 1);
    }
}
