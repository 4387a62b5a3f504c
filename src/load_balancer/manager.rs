//! Service registry kept across reloads.
//!
//! # Responsibilities
//! - Map qualified service names to live pools
//! - Reuse pools (and their health history) when a service is unchanged
//! - Apply server-only changes in place; rebuild on any other change
//! - Own one health checker task per pool
//! - Own the service's connection limiter, shared by every router and
//!   every table generation that targets the service
//!
//! # Design Decisions
//! - Dropping a managed service aborts its health checker
//! - The registry lock is only taken by the reload path, never per request

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;

use crate::config::dynamic::ServiceSpec;
use crate::health::active::{HealthCheckSettings, HealthChecker};
use crate::http::client::HttpClient;
use crate::lifecycle::Shutdown;
use crate::load_balancer::backend::normalize_url;
use crate::load_balancer::pool::BackendPool;
use crate::security::limits::MaxConnections;

struct ManagedService {
    spec: ServiceSpec,
    pool: Arc<BackendPool>,
    max_connections: Option<Arc<MaxConnections>>,
    checker: Option<JoinHandle<()>>,
}

impl Drop for ManagedService {
    fn drop(&mut self) {
        if let Some(checker) = self.checker.take() {
            checker.abort();
        }
    }
}

/// How a service was handled by [`ServiceManager::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Reused,
    Updated,
    Rebuilt,
}

/// Registry of live backend pools.
pub struct ServiceManager {
    services: Mutex<HashMap<String, ManagedService>>,
    health_client: HttpClient,
    shutdown: Shutdown,
}

impl ServiceManager {
    pub fn new(health_client: HttpClient, shutdown: Shutdown) -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
            health_client,
            shutdown,
        }
    }

    /// Reconcile the registry with `specs` and return the live pools.
    pub fn sync(&self, specs: &BTreeMap<String, ServiceSpec>) -> HashMap<String, Arc<BackendPool>> {
        let mut services = self.services.lock().unwrap_or_else(PoisonError::into_inner);

        services.retain(|name, _| {
            let keep = specs.contains_key(name);
            if !keep {
                tracing::info!(service = %name, "Service removed");
            }
            keep
        });

        let mut pools = HashMap::with_capacity(specs.len());
        for (name, spec) in specs {
            let action = match services.get_mut(name) {
                Some(managed) if managed.spec == *spec => SyncAction::Reused,
                Some(managed) if managed.spec.differs_only_in_servers(spec) => {
                    update_servers(&managed.pool, spec);
                    managed.spec = spec.clone();
                    SyncAction::Updated
                }
                _ => {
                    services.insert(name.clone(), self.build(name, spec));
                    SyncAction::Rebuilt
                }
            };
            tracing::debug!(service = %name, ?action, "Service synchronized");

            if let Some(managed) = services.get(name) {
                pools.insert(name.clone(), managed.pool.clone());
            }
        }
        pools
    }

    pub fn get(&self, name: &str) -> Option<Arc<BackendPool>> {
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|managed| managed.pool.clone())
    }

    /// The service's connection limiter, when `max_connections` is set.
    pub fn max_connections(&self, name: &str) -> Option<Arc<MaxConnections>> {
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .and_then(|managed| managed.max_connections.clone())
    }

    pub fn len(&self) -> usize {
        self.services.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn build(&self, name: &str, spec: &ServiceSpec) -> ManagedService {
        let pool = Arc::new(BackendPool::from_spec(name, spec));
        let checker = spec
            .health_check
            .as_ref()
            .and_then(|hc| HealthCheckSettings::from_spec(name, hc))
            .map(|settings| {
                HealthChecker::new(pool.clone(), settings, self.health_client.clone())
                    .spawn(self.shutdown.subscribe())
            });
        tracing::info!(
            service = %name,
            servers = pool.len(),
            health_check = checker.is_some(),
            "Service built"
        );

        ManagedService {
            spec: spec.clone(),
            pool,
            max_connections: spec
                .max_connections
                .filter(|max| *max > 0)
                .map(|max| Arc::new(MaxConnections::new(max))),
            checker,
        }
    }
}

fn update_servers(pool: &BackendPool, spec: &ServiceSpec) {
    let wanted: Vec<String> = spec
        .servers
        .iter()
        .filter_map(|server| url::Url::parse(&server.url).ok())
        .map(|url| normalize_url(&url))
        .collect();

    for server in pool.servers().iter() {
        if !wanted.iter().any(|key| key == server.key()) {
            pool.remove_server(server.key());
        }
    }
    for server in &spec.servers {
        if let Err(e) = pool.upsert_server(&server.url, server.weight) {
            tracing::error!(service = %pool.name(), error = %e, "Skipping server");
        }
    }
}
