//! Backend pool management.
//!
//! # Responsibilities
//! - Hold the servers of one service behind a lock-free snapshot
//! - Select a server for a request (sticky cookie first, then the algorithm)
//! - Add, update and remove servers without interrupting traffic
//!
//! # Design Decisions
//! - Readers load an `Arc<Vec<_>>` snapshot; writers copy, modify and swap
//! - Writers serialize on a private mutex that readers never touch
//! - Excluded servers (already tried by a retry) are avoided when possible

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use axum::http::header::{HeaderMap, HeaderValue};

use crate::config::dynamic::{LoadBalancerMethod, ServiceSpec};
use crate::load_balancer::{
    backend::{normalize_url, Server},
    least_conn::DynamicRoundRobin,
    round_robin::WeightedRoundRobin,
    sticky::StickySession,
    LoadBalancer,
};

/// Errors produced by a pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("no available server")]
    NoAvailableServer,

    #[error("invalid server url {url:?}: {reason}")]
    InvalidServerUrl { url: String, reason: String },
}

/// Outcome of a successful pick.
#[derive(Debug, Clone)]
pub struct Selection {
    pub server: Arc<Server>,
    /// Affinity cookie to send back, when a new pin was made.
    pub set_cookie: Option<HeaderValue>,
}

/// A dynamically mutable set of weighted servers behind one service.
#[derive(Debug)]
pub struct BackendPool {
    name: String,
    servers: ArcSwap<Vec<Arc<Server>>>,
    writer: Mutex<()>,
    balancer: Box<dyn LoadBalancer>,
    sticky: Option<StickySession>,
}

impl BackendPool {
    /// Create an empty pool.
    pub fn new(name: impl Into<String>, method: LoadBalancerMethod, sticky: Option<StickySession>) -> Self {
        let balancer: Box<dyn LoadBalancer> = match method {
            LoadBalancerMethod::WeightedRoundRobin => Box::new(WeightedRoundRobin::new()),
            LoadBalancerMethod::DynamicRoundRobin => Box::new(DynamicRoundRobin::new()),
        };
        Self {
            name: name.into(),
            servers: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
            balancer,
            sticky,
        }
    }

    /// Build a pool from a service definition. Invalid servers are logged and skipped.
    pub fn from_spec(name: &str, spec: &ServiceSpec) -> Self {
        let sticky = spec
            .load_balancer
            .sticky
            .as_ref()
            .map(|sticky| StickySession::new(name, sticky.cookie_name.as_deref()));
        let pool = Self::new(name, spec.load_balancer.method, sticky);

        for server in &spec.servers {
            if let Err(e) = pool.upsert_server(&server.url, server.weight) {
                tracing::error!(service = %name, error = %e, "Skipping server");
            }
        }
        pool
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current server snapshot.
    pub fn servers(&self) -> Arc<Vec<Arc<Server>>> {
        self.servers.load_full()
    }

    pub fn len(&self) -> usize {
        self.servers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick a server for a request.
    pub fn next_server(&self, headers: &HeaderMap) -> Result<Selection, PoolError> {
        self.next_server_excluding(headers, &[])
    }

    /// Pick a server, avoiding the `excluded` keys unless nothing else is left.
    pub fn next_server_excluding(
        &self,
        headers: &HeaderMap,
        excluded: &[String],
    ) -> Result<Selection, PoolError> {
        let snapshot = self.servers.load();
        let available: Vec<Arc<Server>> = snapshot
            .iter()
            .filter(|server| server.is_available())
            .cloned()
            .collect();
        if available.is_empty() {
            return Err(PoolError::NoAvailableServer);
        }

        if let Some(sticky) = &self.sticky {
            if let Some(value) = sticky.requested_value(headers) {
                let pinned = available.iter().find(|server| {
                    server.cookie_value() == value && !excluded.iter().any(|k| k == server.key())
                });
                if let Some(server) = pinned {
                    return Ok(Selection {
                        server: server.clone(),
                        set_cookie: None,
                    });
                }
            }
        }

        let candidates: Vec<Arc<Server>> = available
            .iter()
            .filter(|server| !excluded.iter().any(|k| k == server.key()))
            .cloned()
            .collect();
        let candidates = if candidates.is_empty() { available } else { candidates };

        let server = self
            .balancer
            .next_server(&candidates)
            .ok_or(PoolError::NoAvailableServer)?;
        let set_cookie = self
            .sticky
            .as_ref()
            .and_then(|sticky| sticky.set_cookie(server.cookie_value()));

        Ok(Selection { server, set_cookie })
    }

    /// Add a server, or update the weight of an existing one (keeping its health).
    pub fn upsert_server(&self, url: &str, weight: u32) -> Result<(), PoolError> {
        let candidate = Server::new(url, weight)?;

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.servers.load_full();
        if let Some(existing) = current.iter().find(|s| s.key() == candidate.key()) {
            existing.set_weight(weight);
            return Ok(());
        }

        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(Arc::new(candidate));
        self.servers.store(Arc::new(next));
        tracing::debug!(service = %self.name, server = %url, weight, "Server added");
        Ok(())
    }

    /// Remove a server. Returns false when it was not in the pool.
    pub fn remove_server(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };
        let key = normalize_url(&parsed);

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.servers.load_full();
        if !current.iter().any(|s| s.key() == key) {
            return false;
        }
        let next: Vec<Arc<Server>> = current.iter().filter(|s| s.key() != key).cloned().collect();
        self.servers.store(Arc::new(next));
        tracing::debug!(service = %self.name, server = %url, "Server removed");
        true
    }
}
