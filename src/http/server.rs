//! Entry point servers.
//!
//! # Responsibilities
//! - Bind every configured entry point (plain or TLS)
//! - Apply the entry point's forwarded-header policy
//! - Dispatch requests to the entry point's live route table
//! - Stop accepting on shutdown and drain within the grace period
//!
//! # Design Decisions
//! - Binding happens before serving; any bind or TLS error is fatal
//! - Each entry point gets its own `axum_server::Handle`; one shutdown
//!   signal drains them all
//! - Request IDs come from `tower-http` and are echoed on responses

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use futures_util::future::try_join_all;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::config::schema::StaticConfig;
use crate::http::request::{peer_addr, MakeRequestUuid};
use crate::lifecycle::Shutdown;
use crate::net::tls::load_tls_config;
use crate::net::{Listener, ListenerError};
use crate::routing::EntryPointRouter;
use crate::security::access_control::IpRangeError;
use crate::security::headers::ForwardedHeaders;

/// Fatal startup and serving errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("entry point {entry_point}: {source}")]
    Listener {
        entry_point: String,
        #[source]
        source: ListenerError,
    },

    #[error("entry point {entry_point}: failed to load TLS certificate: {source}")]
    Tls {
        entry_point: String,
        #[source]
        source: std::io::Error,
    },

    #[error("entry point {entry_point}: invalid trusted IP: {source}")]
    TrustedIps {
        entry_point: String,
        #[source]
        source: IpRangeError,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[derive(Clone)]
struct EntryState {
    router: Arc<EntryPointRouter>,
    forwarded: Arc<ForwardedHeaders>,
}

struct EntryPoint {
    name: String,
    listener: Listener,
    tls: Option<RustlsConfig>,
    state: EntryState,
}

/// All bound entry points.
pub struct HttpServer {
    entry_points: Vec<EntryPoint>,
    grace_timeout: Duration,
    shutdown: Shutdown,
}

impl HttpServer {
    /// Bind every entry point of `config`.
    pub async fn bind(config: &StaticConfig, shutdown: Shutdown) -> Result<Self, ServerError> {
        let mut entry_points = Vec::with_capacity(config.entry_points.len());
        for (name, entry) in &config.entry_points {
            let listener = Listener::bind(&entry.address).map_err(|source| ServerError::Listener {
                entry_point: name.clone(),
                source,
            })?;
            let tls = match &entry.tls {
                Some(tls) => Some(load_tls_config(&tls.cert_path, &tls.key_path).await.map_err(
                    |source| ServerError::Tls {
                        entry_point: name.clone(),
                        source,
                    },
                )?),
                None => None,
            };
            let forwarded = ForwardedHeaders::from_config(
                &entry.forwarded_headers,
                tls.is_some(),
                listener.local_addr().port(),
            )
            .map_err(|source| ServerError::TrustedIps {
                entry_point: name.clone(),
                source,
            })?;

            tracing::info!(
                entry_point = %name,
                address = %listener.local_addr(),
                tls = tls.is_some(),
                "Entry point bound"
            );
            entry_points.push(EntryPoint {
                name: name.clone(),
                listener,
                tls,
                state: EntryState {
                    router: Arc::new(EntryPointRouter::new(name.clone())),
                    forwarded: Arc::new(forwarded),
                },
            });
        }

        Ok(Self {
            entry_points,
            grace_timeout: config.grace_timeout(),
            shutdown,
        })
    }

    /// Bound address of an entry point.
    pub fn local_addr(&self, entry_point: &str) -> Option<SocketAddr> {
        self.entry_points
            .iter()
            .find(|entry| entry.name == entry_point)
            .map(|entry| entry.listener.local_addr())
    }

    /// The live route tables, by entry point name.
    pub fn routers(&self) -> BTreeMap<String, Arc<EntryPointRouter>> {
        self.entry_points
            .iter()
            .map(|entry| (entry.name.clone(), entry.state.router.clone()))
            .collect()
    }

    /// Serve until shutdown, then drain in-flight requests.
    pub async fn run(self) -> Result<(), ServerError> {
        let handles: Vec<Handle> = self.entry_points.iter().map(|_| Handle::new()).collect();
        let mut shutdown_rx = self.shutdown.subscribe();
        let grace = self.grace_timeout;
        let already_triggered = self.shutdown.is_triggered();
        let shutdown_handles = handles.clone();
        tokio::spawn(async move {
            if !already_triggered {
                let _ = shutdown_rx.recv().await;
            }
            tracing::info!(grace = ?grace, "Stopping entry points");
            for handle in &shutdown_handles {
                handle.graceful_shutdown(Some(grace));
            }
        });

        let servers = self.entry_points.into_iter().zip(handles).map(|(entry, handle)| async move {
            let app = build_router(entry.state).into_make_service_with_connect_info::<SocketAddr>();
            let listener = entry.listener.into_inner();
            let result = match entry.tls {
                Some(tls) => {
                    axum_server::from_tcp_rustls(listener, tls)
                        .handle(handle)
                        .serve(app)
                        .await
                }
                None => axum_server::from_tcp(listener).handle(handle).serve(app).await,
            };
            tracing::info!(entry_point = %entry.name, "Entry point stopped");
            result
        });

        try_join_all(servers).await?;
        Ok(())
    }
}

fn build_router(state: EntryState) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn dispatch(State(state): State<EntryState>, mut req: Request<Body>) -> Response {
    let peer = peer_addr(&req);
    state.forwarded.apply(req.headers_mut(), peer);
    state.router.dispatch(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::EntryPointConfig;
    use axum::http::StatusCode;

    fn config() -> StaticConfig {
        let mut config = StaticConfig::default();
        config.entry_points.clear();
        for name in ["web", "internal"] {
            config.entry_points.insert(
                name.to_string(),
                EntryPointConfig {
                    address: "127.0.0.1:0".into(),
                    ..Default::default()
                },
            );
        }
        config.lifecycle.grace_timeout = "1s".into();
        config
    }

    #[tokio::test]
    async fn binds_all_entry_points() {
        let server = HttpServer::bind(&config(), Shutdown::new()).await.unwrap();
        assert!(server.local_addr("web").is_some());
        assert!(server.local_addr("internal").is_some());
        assert_ne!(server.local_addr("web"), server.local_addr("internal"));
        assert_eq!(server.routers().len(), 2);
    }

    #[tokio::test]
    async fn missing_certificate_is_fatal() {
        let mut config = config();
        config.entry_points.get_mut("web").unwrap().tls = Some(crate::config::schema::TlsConfig {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
        });
        let err = HttpServer::bind(&config, Shutdown::new()).await.err().unwrap();
        assert!(matches!(err, ServerError::Tls { .. }));
    }

    #[tokio::test]
    async fn unmatched_requests_get_404_with_request_id() {
        let shutdown = Shutdown::new();
        let server = HttpServer::bind(&config(), shutdown.clone()).await.unwrap();
        let addr = server.local_addr("web").unwrap();
        let running = tokio::spawn(server.run());

        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let response = client.get(format!("http://{addr}/nothing")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-request-id"));

        shutdown.trigger();
        running.await.unwrap().unwrap();
    }
}
