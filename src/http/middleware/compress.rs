//! Response compression negotiated from the client's Accept-Encoding.
//!
//! The encoding itself is tower-http's `Compression` service wrapped around
//! the rest of the chain. It already skips responses that carry a
//! Content-Encoding or Content-Range and sets `Vary: accept-encoding`.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{header, Extensions, HeaderMap, Request, StatusCode, Version};
use axum::response::Response;
use futures_util::future::BoxFuture;
use tower::Service;
use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};
use tower_http::compression::Compression;

use crate::config::dynamic::CompressSpec;
use crate::http::middleware::{Middleware, Next};

#[derive(Debug, Clone)]
pub struct Compress {
    min_size: u16,
    excluded: Arc<[String]>,
}

impl Compress {
    pub fn from_spec(spec: &CompressSpec) -> Self {
        Self {
            min_size: spec.min_response_body_bytes,
            excluded: spec
                .excluded_content_types
                .iter()
                .map(|content_type| content_type.trim().to_ascii_lowercase())
                .filter(|content_type| !content_type.is_empty())
                .collect(),
        }
    }

    fn predicate(&self) -> impl Predicate {
        let excluded = self.excluded.clone();
        SizeAbove::new(self.min_size)
            .and(NotForContentType::GRPC)
            .and(NotForContentType::IMAGES)
            .and(NotForContentType::SSE)
            .and(move |_: StatusCode, _: Version, headers: &HeaderMap, _: &Extensions| {
                let content_type = headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                !excluded.iter().any(|prefix| content_type.starts_with(prefix.as_str()))
            })
    }
}

/// The rest of the chain as a tower service.
struct Downstream<'a>(Next<'a>);

impl<'a> Service<Request<Body>> for Downstream<'a> {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'a, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let next = self.0;
        Box::pin(async move { Ok(next.run(req).await) })
    }
}

impl Middleware for Compress {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        let mut service = Compression::new(Downstream(next)).compress_when(self.predicate());
        let response = service.call(req);
        Box::pin(async move {
            match response.await {
                Ok(response) => response.map(Body::new),
                Err(never) => match never {},
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::middleware::test_support::run;
    use crate::http::middleware::Endpoint;

    /// Replies with a fixed text payload.
    struct Payload {
        len: usize,
        content_type: &'static str,
        encoding: Option<&'static str>,
    }

    impl Payload {
        fn text(len: usize) -> Self {
            Self {
                len,
                content_type: "text/plain",
                encoding: None,
            }
        }
    }

    impl Endpoint for Payload {
        fn call(&self, _req: Request<Body>) -> BoxFuture<'_, Response> {
            let mut builder = Response::builder()
                .header(header::CONTENT_TYPE, self.content_type)
                .header(header::CONTENT_LENGTH, self.len);
            if let Some(encoding) = self.encoding {
                builder = builder.header(header::CONTENT_ENCODING, encoding);
            }
            let response = builder.body(Body::from("a".repeat(self.len))).unwrap();
            Box::pin(async move { response })
        }
    }

    fn request(accept: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        if let Some(accept) = accept {
            builder = builder.header(header::ACCEPT_ENCODING, accept);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    #[tokio::test]
    async fn compresses_for_accepting_clients() {
        let stage = Compress::from_spec(&CompressSpec::default());

        let response = run(&stage, &Payload::text(4096), request(Some("gzip"))).await;
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        let bytes = body(response).await;
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        assert!(bytes.len() < 4096);

        let response = run(&stage, &Payload::text(4096), request(Some("br;q=1.0, gzip;q=0.5"))).await;
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "br");
    }

    #[tokio::test]
    async fn leaves_identity_clients_alone() {
        let stage = Compress::from_spec(&CompressSpec::default());

        let response = run(&stage, &Payload::text(4096), request(None)).await;
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(body(response).await.len(), 4096);
    }

    #[tokio::test]
    async fn skips_encoded_small_and_excluded_responses() {
        let stage = Compress::from_spec(&CompressSpec {
            min_response_body_bytes: 1024,
            excluded_content_types: vec!["Application/Octet-Stream".into()],
        });

        let encoded = Payload {
            encoding: Some("br"),
            ..Payload::text(4096)
        };
        let response = run(&stage, &encoded, request(Some("gzip"))).await;
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "br");
        assert_eq!(body(response).await.len(), 4096);

        let response = run(&stage, &Payload::text(100), request(Some("gzip"))).await;
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());

        let binary = Payload {
            content_type: "application/octet-stream",
            ..Payload::text(4096)
        };
        let response = run(&stage, &binary, request(Some("gzip"))).await;
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
    }
}
