//! Forwards a request to one upstream server.
//!
//! # Responsibilities
//! - Pick a server from the service pool (honouring retry exclusions)
//! - Rewrite the URI to the server's authority and base path
//! - Strip hop-by-hop headers in both directions
//! - Classify failures: refused/reset → 502, header timeout → 504
//!
//! The in-flight counter of the chosen server is held until the response
//! body has been fully streamed to the client.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::SET_COOKIE;
use axum::http::uri::{PathAndQuery, Scheme};
use axum::http::{Request, Uri};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::http::client::HttpClient;
use crate::http::middleware::Endpoint;
use crate::http::request::request_id;
use crate::http::response::{with_guard, ExcludedServers, UpstreamFailure, UpstreamServer};
use crate::load_balancer::{BackendPool, Server};
use crate::security::headers::strip_hop_by_hop;

/// The innermost endpoint of every service chain.
pub struct Forwarder {
    pool: Arc<BackendPool>,
    client: HttpClient,
    response_header_timeout: Option<Duration>,
}

impl Forwarder {
    pub fn new(pool: Arc<BackendPool>, client: HttpClient, response_header_timeout: Option<Duration>) -> Self {
        Self {
            pool,
            client,
            response_header_timeout,
        }
    }

    async fn forward(&self, mut req: Request<Body>) -> Response {
        let excluded = req
            .extensions_mut()
            .remove::<ExcludedServers>()
            .unwrap_or_default();
        let selection = match self.pool.next_server_excluding(req.headers(), &excluded.0) {
            Ok(selection) => selection,
            Err(e) => {
                tracing::warn!(service = %self.pool.name(), error = %e, "No server to forward to");
                return UpstreamFailure::NoServer.into_response();
            }
        };
        let server = selection.server;
        let guard = server.track();
        let request_id = request_id(&req).to_string();

        *req.uri_mut() = upstream_uri(&server, req.uri());
        strip_hop_by_hop(req.headers_mut());

        let upstream = self.client.request(req);
        let result = match self.response_header_timeout {
            Some(limit) => match tokio::time::timeout(limit, upstream).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        request_id = %request_id,
                        server = %server.key(),
                        timeout = ?limit,
                        "Upstream response header timeout"
                    );
                    return tag(UpstreamFailure::Timeout.into_response(), &server);
                }
            },
            None => upstream.await,
        };

        match result {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                if let Some(cookie) = selection.set_cookie {
                    parts.headers.append(SET_COOKIE, cookie);
                }
                let body = with_guard(Body::new(body), guard);
                tag(Response::from_parts(parts, body), &server)
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    server = %server.key(),
                    error = %e,
                    "Upstream request failed"
                );
                tag(UpstreamFailure::Network.into_response(), &server)
            }
        }
    }
}

impl Endpoint for Forwarder {
    fn call(&self, req: Request<Body>) -> BoxFuture<'_, Response> {
        Box::pin(self.forward(req))
    }
}

fn tag(mut response: Response, server: &Server) -> Response {
    response
        .extensions_mut()
        .insert(UpstreamServer(server.key().to_string()));
    response
}

/// Combine the server's authority and base path with the request path.
fn upstream_uri(server: &Server, original: &Uri) -> Uri {
    let base = server.url.path().trim_end_matches('/');
    let path_and_query = original
        .path_and_query()
        .map(PathAndQuery::as_str)
        .unwrap_or("/");
    let joined = format!("{base}{path_and_query}");

    let mut parts = original.clone().into_parts();
    parts.scheme = Some(Scheme::HTTP);
    parts.authority = Some(server.authority().clone());
    parts.path_and_query = joined.parse().ok().or(parts.path_and_query);
    Uri::from_parts(parts).unwrap_or_else(|_| original.clone())
}
