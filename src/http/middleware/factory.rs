//! Builds configured middlewares from their dynamic specs.

use std::sync::Arc;

use crate::config::dynamic::MiddlewareSpec;
use crate::http::middleware::compress::Compress;
use crate::http::middleware::errors::ErrorPages;
use crate::http::middleware::headers::CustomHeaders;
use crate::http::middleware::redirect::RedirectScheme;
use crate::http::middleware::rewrite::PathRewriter;
use crate::http::middleware::Middleware;
use crate::routing::rule::PathRewrite;
use crate::security::access_control::IpWhiteList;
use crate::security::auth::BasicAuth;
use crate::security::rate_limit::RateLimiter;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("middleware {name}: {reason}")]
pub struct MiddlewareError {
    pub name: String,
    pub reason: String,
}

/// Instantiate the middleware `name` described by `spec`.
pub fn build_middleware(name: &str, spec: &MiddlewareSpec) -> Result<Arc<dyn Middleware>, MiddlewareError> {
    let fail = |reason: String| MiddlewareError {
        name: name.to_string(),
        reason,
    };

    let middleware: Arc<dyn Middleware> = match spec {
        MiddlewareSpec::BasicAuth(spec) => Arc::new(BasicAuth::from_spec(spec).map_err(fail)?),
        MiddlewareSpec::Headers(spec) => Arc::new(CustomHeaders::from_spec(spec).map_err(fail)?),
        MiddlewareSpec::IpWhiteList(spec) => {
            Arc::new(IpWhiteList::new(&spec.source_range).map_err(|e| fail(e.to_string()))?)
        }
        MiddlewareSpec::RedirectScheme(spec) => Arc::new(RedirectScheme::from_spec(spec)),
        MiddlewareSpec::RateLimit(spec) => Arc::new(RateLimiter::from_spec(name, spec).map_err(fail)?),
        MiddlewareSpec::Errors(spec) => Arc::new(ErrorPages::from_spec(spec).map_err(fail)?),
        MiddlewareSpec::StripPrefix(spec) => {
            if spec.prefixes.is_empty() {
                return Err(fail("no prefixes configured".to_string()));
            }
            Arc::new(PathRewriter::new(PathRewrite {
                strip_prefixes: spec.prefixes.clone(),
                ..Default::default()
            }))
        }
        MiddlewareSpec::AddPrefix(spec) => Arc::new(PathRewriter::new(PathRewrite {
            add_prefix: Some(spec.prefix.clone()),
            ..Default::default()
        })),
        MiddlewareSpec::Compress(spec) => Arc::new(Compress::from_spec(spec)),
    };
    Ok(middleware)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::dynamic::{BasicAuthSpec, CompressSpec, IpWhiteListSpec, StripPrefixSpec};
    use crate::http::middleware::test_support::{run, Recorder};
    use axum::body::Body;
    use axum::http::Request;

    #[test]
    fn reports_invalid_specs_with_name() {
        let spec = MiddlewareSpec::IpWhiteList(IpWhiteListSpec {
            source_range: vec!["nope".into()],
        });
        let err = build_middleware("wl@file", &spec).err().unwrap();
        assert_eq!(err.name, "wl@file");

        let spec = MiddlewareSpec::BasicAuth(BasicAuthSpec::default());
        assert!(build_middleware("auth@file", &spec).is_err());
    }

    #[tokio::test]
    async fn strip_prefix_middleware_rewrites_path() {
        let spec = MiddlewareSpec::StripPrefix(StripPrefixSpec {
            prefixes: vec!["/api".into()],
        });
        let stage = build_middleware("strip@file", &spec).unwrap();
        let endpoint = Recorder::default();

        let req = Request::builder().uri("/api/users?id=1").body(Body::empty()).unwrap();
        run(stage.as_ref(), &endpoint, req).await;

        assert_eq!(endpoint.last().unwrap().uri(), "/users?id=1");
    }

    #[tokio::test]
    async fn compress_middleware_honours_accept_encoding() {
        use crate::http::middleware::Endpoint;
        use axum::http::header;
        use axum::response::Response;
        use futures_util::future::BoxFuture;

        struct Text;

        impl Endpoint for Text {
            fn call(&self, _req: Request<Body>) -> BoxFuture<'_, Response> {
                Box::pin(async { Response::new(Body::from("x".repeat(2048))) })
            }
        }

        let spec = MiddlewareSpec::Compress(CompressSpec::default());
        let stage = build_middleware("gzip@file", &spec).unwrap();

        let req = Request::builder()
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(Body::empty())
            .unwrap();
        let response = run(stage.as_ref(), &Text, req).await;
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
    }
}
