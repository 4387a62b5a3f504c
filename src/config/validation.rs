//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (default entry points exist)
//! - Validate value ranges (addresses parse, durations parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: StaticConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::duration::parse_duration;
use crate::config::schema::StaticConfig;

/// A single semantic problem in the static configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no entry points configured")]
    NoEntryPoints,

    #[error("entry point {name}: invalid address {address:?}")]
    InvalidAddress { name: String, address: String },

    #[error("entry points {first} and {second} share address {address}")]
    DuplicateAddress {
        first: String,
        second: String,
        address: String,
    },

    #[error("default entry point {0} is not defined")]
    UnknownDefaultEntryPoint(String),

    #[error("{field}: invalid duration {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("file provider path is empty")]
    EmptyProviderPath,

    #[error("metrics address {0:?} is invalid")]
    InvalidMetricsAddress(String),
}

/// Validate the static configuration, collecting every error.
pub fn validate_config(config: &StaticConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.entry_points.is_empty() {
        errors.push(ValidationError::NoEntryPoints);
    }

    let mut seen: Vec<(SocketAddr, &str)> = Vec::new();
    for (name, entry_point) in &config.entry_points {
        match entry_point.address.parse::<SocketAddr>() {
            Ok(addr) => {
                // Port 0 asks the OS for a free port, so it never collides.
                if addr.port() != 0 {
                    if let Some((_, first)) = seen.iter().find(|(other, _)| *other == addr) {
                        errors.push(ValidationError::DuplicateAddress {
                            first: first.to_string(),
                            second: name.clone(),
                            address: entry_point.address.clone(),
                        });
                    }
                }
                seen.push((addr, name));
            }
            Err(_) => errors.push(ValidationError::InvalidAddress {
                name: name.clone(),
                address: entry_point.address.clone(),
            }),
        }
    }

    let defined: HashSet<&str> = config.entry_points.keys().map(String::as_str).collect();
    for name in &config.default_entry_points {
        if !defined.contains(name.as_str()) {
            errors.push(ValidationError::UnknownDefaultEntryPoint(name.clone()));
        }
    }

    let mut durations = vec![
        ("providers.throttle_duration", &config.providers.throttle_duration),
        ("lifecycle.grace_timeout", &config.lifecycle.grace_timeout),
        ("transport.dial_timeout", &config.transport.dial_timeout),
        ("transport.response_header_timeout", &config.transport.response_header_timeout),
        ("transport.idle_conn_timeout", &config.transport.idle_conn_timeout),
    ];
    if let Some(retry) = &config.retry {
        durations.push(("retry.initial_interval", &retry.initial_interval));
    }
    for (field, value) in durations {
        if parse_duration(value).is_err() {
            errors.push(ValidationError::InvalidDuration {
                field,
                value: value.clone(),
            });
        }
    }

    if let Some(file) = &config.providers.file {
        if file.path.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyProviderPath);
        }
    }

    if config.metrics.enabled && config.metrics.address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidMetricsAddress(config.metrics.address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{EntryPointConfig, RetryConfig};

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&StaticConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = StaticConfig::default();
        config.entry_points.insert(
            "other".into(),
            EntryPointConfig {
                address: "0.0.0.0:8080".into(),
                ..Default::default()
            },
        );
        config.default_entry_points.push("admin".into());
        config.lifecycle.grace_timeout = "soon".into();
        config.retry = Some(RetryConfig {
            attempts: Some(3),
            initial_interval: "1x".into(),
        });

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::UnknownDefaultEntryPoint("admin".into())));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateAddress { .. })));
    }

    #[test]
    fn ephemeral_ports_do_not_collide() {
        let mut config = StaticConfig::default();
        for name in ["web", "internal"] {
            config.entry_points.insert(
                name.into(),
                EntryPointConfig {
                    address: "127.0.0.1:0".into(),
                    ..Default::default()
                },
            );
        }
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn rejects_empty_entry_points() {
        let mut config = StaticConfig::default();
        config.entry_points.clear();
        config.default_entry_points.clear();
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::NoEntryPoints]
        );
    }
}
