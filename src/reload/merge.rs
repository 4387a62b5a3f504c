//! Merges per-provider configurations into one namespace.
//!
//! Every router, middleware and service is renamed `name@provider`.
//! References inside a provider (a router's service and middlewares) are
//! qualified with the same provider unless they already carry an `@`,
//! which lets a router point at another provider's service.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::dynamic::{CertificateSpec, Configuration, MiddlewareSpec, RouterSpec, ServiceSpec};

pub const PROVIDER_SEPARATOR: char = '@';

/// Union of every provider's last accepted configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedConfiguration {
    pub routers: BTreeMap<String, RouterSpec>,
    pub middlewares: BTreeMap<String, MiddlewareSpec>,
    pub services: BTreeMap<String, ServiceSpec>,
    pub certificates: BTreeSet<CertificateSpec>,
}

/// `name@provider`.
pub fn qualify(name: &str, provider: &str) -> String {
    format!("{name}{PROVIDER_SEPARATOR}{provider}")
}

/// Qualify a reference unless it already names a provider.
pub fn qualify_reference(name: &str, provider: &str) -> String {
    if name.contains(PROVIDER_SEPARATOR) {
        name.to_string()
    } else {
        qualify(name, provider)
    }
}

/// Merge `configurations` (keyed by provider name).
pub fn merge(configurations: &BTreeMap<String, Configuration>) -> MergedConfiguration {
    let mut merged = MergedConfiguration::default();

    for (provider, configuration) in configurations {
        for (name, router) in &configuration.routers {
            if !valid_name(provider, "router", name) {
                continue;
            }
            let mut router = router.clone();
            router.service = qualify_reference(&router.service, provider);
            router.middlewares = router
                .middlewares
                .iter()
                .map(|middleware| qualify_reference(middleware, provider))
                .collect();
            merged.routers.insert(qualify(name, provider), router);
        }

        for (name, middleware) in &configuration.middlewares {
            if valid_name(provider, "middleware", name) {
                merged
                    .middlewares
                    .insert(qualify(name, provider), middleware.clone());
            }
        }

        for (name, service) in &configuration.services {
            if valid_name(provider, "service", name) {
                merged.services.insert(qualify(name, provider), service.clone());
            }
        }

        merged
            .certificates
            .extend(configuration.tls.certificates.iter().cloned());
    }

    merged
}

fn valid_name(provider: &str, kind: &str, name: &str) -> bool {
    if name.contains(PROVIDER_SEPARATOR) {
        tracing::warn!(provider = %provider, kind, name = %name, "Ignoring definition with '@' in its name");
        return false;
    }
    true
}
