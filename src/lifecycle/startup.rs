//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Wire providers into the reload pipeline
//! - Bind entry points and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Entry points bind before providers start, so a bad address never
//!   leaves watchers running
//! - Routing starts empty; every entry point answers 404 until the first
//!   configuration is applied

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::schema::StaticConfig;
use crate::http::{HttpServer, ServerError};
use crate::lifecycle::signals::spawn_signal_handler;
use crate::lifecycle::{Shutdown, TaskPool};
use crate::observability::metrics;
use crate::provider::{ConfigMessage, FileProvider, Provider, ProviderError};
use crate::reload::ConfigurationWatcher;
use crate::routing::{EntryPointRouter, RouteBuilder};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),

    #[error("failed to install metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// A started router: entry points bound, providers running.
pub struct EdgeRouter {
    server: HttpServer,
    routers: BTreeMap<String, Arc<EntryPointRouter>>,
    shutdown: Shutdown,
    tasks: TaskPool,
    config_tx: mpsc::UnboundedSender<ConfigMessage>,
    grace_timeout: std::time::Duration,
}

impl EdgeRouter {
    pub async fn start(config: StaticConfig) -> Result<Self, StartupError> {
        if config.metrics.enabled {
            let addr: SocketAddr = config
                .metrics
                .address
                .parse()
                .map_err(|_| StartupError::MetricsAddress(config.metrics.address.clone()))?;
            metrics::install_exporter(addr)?;
        }

        let shutdown = Shutdown::new();
        let tasks = TaskPool::new(shutdown.clone());

        let server = HttpServer::bind(&config, shutdown.clone()).await?;
        let routers = server.routers();
        let builder = Arc::new(RouteBuilder::new(&config, routers.clone(), shutdown.clone()));

        let mut watcher =
            ConfigurationWatcher::new(config.default_entry_points.clone(), config.throttle_duration());
        let listener_builder = builder.clone();
        watcher.add_listener(move |merged| {
            listener_builder.apply(merged);
        });

        let (config_tx, config_rx) = mpsc::unbounded_channel();
        watcher.start(config_rx, &tasks);

        if let Some(file) = &config.providers.file {
            let mut provider = FileProvider::new(file);
            provider.init()?;
            provider.provide(config_tx.clone(), &tasks)?;
            tracing::info!(provider = provider.name(), "Provider started");
        }

        tracing::info!(
            entry_points = routers.len(),
            throttle = ?config.throttle_duration(),
            "Edge router started"
        );

        Ok(Self {
            server,
            routers,
            shutdown,
            tasks,
            config_tx,
            grace_timeout: config.grace_timeout(),
        })
    }

    pub fn local_addr(&self, entry_point: &str) -> Option<SocketAddr> {
        self.server.local_addr(entry_point)
    }

    pub fn entry_point(&self, name: &str) -> Option<Arc<EntryPointRouter>> {
        self.routers.get(name).cloned()
    }

    /// Handle that stops the router when triggered.
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Push configurations as an extra provider (used by embedders and tests).
    pub fn config_sender(&self) -> mpsc::UnboundedSender<ConfigMessage> {
        self.config_tx.clone()
    }

    /// Serve until shutdown, then wait for background tasks.
    pub async fn serve(self) -> Result<(), StartupError> {
        let Self {
            server,
            tasks,
            config_tx,
            grace_timeout,
            ..
        } = self;
        drop(config_tx);

        let result = server.run().await;
        if !tasks.join(grace_timeout).await {
            tracing::warn!("Background tasks did not stop in time");
        }
        tracing::info!("Shutdown complete");
        result.map_err(StartupError::from)
    }
}

/// Start, install signal handlers and serve until stopped.
pub async fn run(config: StaticConfig) -> Result<(), StartupError> {
    let router = EdgeRouter::start(config).await?;
    spawn_signal_handler(router.shutdown());
    router.serve().await
}
