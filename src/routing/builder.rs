//! Builds route tables from a merged configuration.
//!
//! # Data Flow
//! ```text
//! MergedConfiguration
//!     → ServiceManager::sync (pools reused / updated / rebuilt)
//!     → per router: parse rule, resolve service and middlewares,
//!       assemble router chain + service chain
//!     → one RouteTable per entry point
//!     → EntryPointRouter::swap
//! ```
//!
//! # Design Decisions
//! - A broken router is logged and skipped; the rest of the reload proceeds
//! - Middlewares are instantiated once per reload and shared by routers
//! - Retry and circuit breaker are built per router; the connection limit
//!   belongs to the service and is shared by all of its routers

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::dynamic::{RouterSpec, ServiceSpec};
use crate::config::schema::StaticConfig;
use crate::http::client::{build_client, response_header_timeout, HttpClient};
use crate::http::forwarder::Forwarder;
use crate::http::middleware::access_log::AccessLog;
use crate::http::middleware::factory::{build_middleware, MiddlewareError};
use crate::http::middleware::metrics::RequestMetrics;
use crate::http::middleware::recovery::Recovery;
use crate::http::middleware::rewrite::PathRewriter;
use crate::http::middleware::span::RequestSpan;
use crate::http::middleware::{Chain, Middleware};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{BackendPool, ServiceManager};
use crate::observability::metrics::{self, ReloadOutcome};
use crate::reload::merge::MergedConfiguration;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::expression::ExpressionError;
use crate::resilience::retries::Retry;
use crate::routing::matcher::RuleMatcher;
use crate::routing::router::{EntryPointRouter, RouteEntry, RouteTable};
use crate::routing::rule::{self, RuleError};
use crate::security::limits::Buffering;

/// Why a router was left out of the tables.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    #[error("router {router}: invalid rule: {source}")]
    Rule {
        router: String,
        #[source]
        source: RuleError,
    },

    #[error("router {router}: unknown service {service}")]
    UnknownService { router: String, service: String },

    #[error("router {router}: unknown middleware {middleware}")]
    UnknownMiddleware { router: String, middleware: String },

    #[error("router {router}: {source}")]
    Middleware {
        router: String,
        #[source]
        source: MiddlewareError,
    },

    #[error("router {router}: invalid circuit breaker expression: {source}")]
    CircuitBreaker {
        router: String,
        #[source]
        source: ExpressionError,
    },

    #[error("router {router}: unknown entry point {entry_point}")]
    UnknownEntryPoint { router: String, entry_point: String },
}

/// Retry settings from the static configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: Option<u32>,
    pub initial_interval: Duration,
}

/// Tables produced by one build, plus the routers that were skipped.
#[derive(Debug, Default)]
pub struct BuildOutput {
    pub tables: BTreeMap<String, RouteTable>,
    pub errors: Vec<BuildError>,
}

/// Applies merged configurations to the live entry points.
pub struct RouteBuilder {
    entry_points: BTreeMap<String, Arc<EntryPointRouter>>,
    services: ServiceManager,
    client: HttpClient,
    response_header_timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
}

impl RouteBuilder {
    pub fn new(
        config: &StaticConfig,
        entry_points: BTreeMap<String, Arc<EntryPointRouter>>,
        shutdown: Shutdown,
    ) -> Self {
        let client = build_client(&config.transport);
        let retry = config.retry.as_ref().map(|retry| RetryPolicy {
            attempts: retry.attempts,
            initial_interval: parse_duration(&retry.initial_interval).unwrap_or_default(),
        });
        Self {
            entry_points,
            services: ServiceManager::new(client.clone(), shutdown),
            response_header_timeout: response_header_timeout(&config.transport),
            client,
            retry,
        }
    }

    pub fn entry_point(&self, name: &str) -> Option<&Arc<EntryPointRouter>> {
        self.entry_points.get(name)
    }

    pub fn services(&self) -> &ServiceManager {
        &self.services
    }

    /// Rebuild and swap every entry point's table.
    pub fn apply(&self, merged: &MergedConfiguration) -> ReloadOutcome {
        let pools = self.services.sync(&merged.services);
        let BuildOutput { mut tables, errors } = self.build(merged, &pools);

        for error in &errors {
            tracing::error!(error = %error, "Skipping router");
        }
        for (name, router) in &self.entry_points {
            router.swap(tables.remove(name).unwrap_or_default());
        }

        let outcome = if errors.is_empty() {
            ReloadOutcome::Success
        } else {
            ReloadOutcome::PartialFailure
        };
        metrics::record_reload(outcome);
        tracing::info!(
            routers = merged.routers.len(),
            services = merged.services.len(),
            skipped = errors.len(),
            "Configuration applied"
        );
        outcome
    }

    /// Compile tables without publishing them.
    pub fn build(&self, merged: &MergedConfiguration, pools: &HashMap<String, Arc<BackendPool>>) -> BuildOutput {
        let mut output = BuildOutput::default();
        let mut routes: BTreeMap<String, Vec<RouteEntry>> = self
            .entry_points
            .keys()
            .map(|name| (name.clone(), Vec::new()))
            .collect();
        let mut middlewares: HashMap<String, Arc<dyn Middleware>> = HashMap::new();

        for (name, spec) in &merged.routers {
            let known: Vec<&String> = spec
                .entry_points
                .iter()
                .filter(|entry_point| {
                    let known = routes.contains_key(*entry_point);
                    if !known {
                        output.errors.push(BuildError::UnknownEntryPoint {
                            router: name.clone(),
                            entry_point: (*entry_point).clone(),
                        });
                    }
                    known
                })
                .collect();
            if known.is_empty() {
                continue;
            }

            let (priority, matcher, chain) =
                match self.build_router(name, spec, merged, pools, &mut middlewares) {
                    Ok(parts) => parts,
                    Err(e) => {
                        output.errors.push(e);
                        continue;
                    }
                };

            for entry_point in known {
                if let Some(entries) = routes.get_mut(entry_point) {
                    entries.push(RouteEntry {
                        name: name.clone(),
                        service: spec.service.clone(),
                        priority,
                        matcher: matcher.clone(),
                        chain: chain.clone(),
                    });
                }
            }
        }

        output.tables = routes
            .into_iter()
            .map(|(name, entries)| (name, RouteTable::new(entries)))
            .collect();
        output
    }

    fn build_router(
        &self,
        name: &str,
        spec: &RouterSpec,
        merged: &MergedConfiguration,
        pools: &HashMap<String, Arc<BackendPool>>,
        cache: &mut HashMap<String, Arc<dyn Middleware>>,
    ) -> Result<(i64, RuleMatcher, Arc<Chain>), BuildError> {
        let rule = rule::parse(&spec.rule).map_err(|source| BuildError::Rule {
            router: name.to_string(),
            source,
        })?;
        let unknown_service = || BuildError::UnknownService {
            router: name.to_string(),
            service: spec.service.clone(),
        };
        let pool = pools.get(&spec.service).ok_or_else(unknown_service)?;
        let service = merged.services.get(&spec.service).ok_or_else(unknown_service)?;

        let mut stages: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Recovery::new(name)),
            Arc::new(RequestSpan::new(name)),
            Arc::new(AccessLog::new(name, spec.service.as_str())),
            Arc::new(RequestMetrics::new(name)),
        ];
        if !rule.rewrite.is_empty() {
            stages.push(Arc::new(PathRewriter::new(rule.rewrite.clone())));
        }
        for middleware in &spec.middlewares {
            stages.push(self.middleware(name, middleware, merged, cache)?);
        }

        let tail = self.service_chain(name, &spec.service, pool.clone(), service)?;
        let chain = Arc::new(Chain::new(stages, Arc::new(tail)));

        let priority = if spec.priority != 0 {
            spec.priority
        } else {
            rule.default_priority()
        };
        Ok((priority, rule.matcher, chain))
    }

    fn middleware(
        &self,
        router: &str,
        name: &str,
        merged: &MergedConfiguration,
        cache: &mut HashMap<String, Arc<dyn Middleware>>,
    ) -> Result<Arc<dyn Middleware>, BuildError> {
        if let Some(middleware) = cache.get(name) {
            return Ok(middleware.clone());
        }
        let spec = merged
            .middlewares
            .get(name)
            .ok_or_else(|| BuildError::UnknownMiddleware {
                router: router.to_string(),
                middleware: name.to_string(),
            })?;
        let middleware = build_middleware(name, spec).map_err(|source| BuildError::Middleware {
            router: router.to_string(),
            source,
        })?;
        cache.insert(name.to_string(), middleware.clone());
        Ok(middleware)
    }

    /// retry → circuit breaker → max connections → buffering → forwarder.
    fn service_chain(
        &self,
        router: &str,
        service_name: &str,
        pool: Arc<BackendPool>,
        service: &ServiceSpec,
    ) -> Result<Chain, BuildError> {
        let mut stages: Vec<Arc<dyn Middleware>> = Vec::new();
        if let Some(retry) = self.retry {
            stages.push(Arc::new(Retry::new(pool.clone(), retry.attempts, retry.initial_interval)));
        }
        if let Some(breaker) = &service.circuit_breaker {
            let breaker = CircuitBreaker::new(router, &breaker.expression).map_err(|source| {
                BuildError::CircuitBreaker {
                    router: router.to_string(),
                    source,
                }
            })?;
            stages.push(Arc::new(breaker));
        }
        if let Some(limiter) = self.services.max_connections(service_name) {
            stages.push(limiter);
        }
        if let Some(buffering) = &service.buffering {
            stages.push(Arc::new(Buffering::from_spec(buffering)));
        }

        let forwarder = Forwarder::new(pool, self.client.clone(), self.response_header_timeout);
        Ok(Chain::new(stages, Arc::new(forwarder)))
    }
}
