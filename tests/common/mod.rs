//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use edge_router::config::dynamic::{RouterSpec, ServerSpec, ServiceSpec};
use edge_router::provider::ConfigMessage;
use edge_router::routing::EntryPointRouter;
use edge_router::{Configuration, EdgeRouter, Shutdown, StaticConfig};

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        404 => "404 Not Found",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

async fn read_request(socket: &mut TcpStream) {
    let mut buf = [0u8; 4096];
    let mut seen = Vec::new();
    while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => seen.extend_from_slice(&buf[..n]),
        }
    }
}

async fn write_response(socket: &mut TcpStream, status: u16, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_line(status),
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Start a programmable mock backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                read_request(&mut socket).await;
                let (status, body) = f().await;
                write_response(&mut socket, status, &body).await;
            });
        }
    });
    addr
}

/// Start a mock backend that returns a fixed 200 response.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (200, body.to_string()) }).await
}

/// Start a backend that answers `status` and counts requests.
pub async fn start_counting_backend(status: u16, body: &'static str) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let addr = start_programmable_backend(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { (status, body.to_string()) }
    })
    .await;
    (addr, hits)
}

/// Start a backend that answers after `delay`.
pub async fn start_delayed_backend(delay: Duration, body: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move {
        tokio::time::sleep(delay).await;
        (200, body.to_string())
    })
    .await
}

/// Start a backend that accepts connections and closes them without answering.
pub async fn start_reset_backend() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });
    (addr, hits)
}

/// Static configuration with one ephemeral "web" entry point.
pub fn static_config() -> StaticConfig {
    let mut config = StaticConfig::default();
    config.entry_points.get_mut("web").unwrap().address = "127.0.0.1:0".into();
    config.providers.throttle_duration = "50ms".into();
    config.lifecycle.grace_timeout = "2s".into();
    config
}

pub struct TestRouter {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub web: Arc<EntryPointRouter>,
    pub tx: mpsc::UnboundedSender<ConfigMessage>,
    pub serving: tokio::task::JoinHandle<Result<(), edge_router::lifecycle::StartupError>>,
}

impl TestRouter {
    pub async fn start(config: StaticConfig) -> Self {
        let router = EdgeRouter::start(config).await.unwrap();
        let addr = router.local_addr("web").unwrap();
        let web = router.entry_point("web").unwrap();
        let shutdown = router.shutdown();
        let tx = router.config_sender();
        let serving = tokio::spawn(router.serve());
        Self {
            addr,
            shutdown,
            web,
            tx,
            serving,
        }
    }

    pub fn push(&self, provider: &str, configuration: Configuration) {
        self.tx
            .send(ConfigMessage {
                provider_name: provider.to_string(),
                configuration: Some(configuration),
            })
            .unwrap();
    }

    /// Wait until the "web" table has been swapped `generation` times.
    pub async fn wait_for_generation(&self, generation: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.web.generation() < generation {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("configuration was not applied in time");
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

pub fn service(backends: &[(SocketAddr, u32)]) -> ServiceSpec {
    ServiceSpec {
        servers: backends
            .iter()
            .map(|(addr, weight)| ServerSpec {
                url: format!("http://{addr}"),
                weight: *weight,
            })
            .collect(),
        ..Default::default()
    }
}

pub fn router(rule: &str, service: &str) -> RouterSpec {
    RouterSpec {
        rule: rule.to_string(),
        entry_points: Vec::new(),
        middlewares: Vec::new(),
        service: service.to_string(),
        priority: 0,
    }
}

/// One router `name` → one service `name` with `backends`.
pub fn single_route(name: &str, rule: &str, backends: &[(SocketAddr, u32)]) -> Configuration {
    let mut config = Configuration::default();
    config.routers.insert(name.to_string(), router(rule, name));
    config.services.insert(name.to_string(), service(backends));
    config
}
