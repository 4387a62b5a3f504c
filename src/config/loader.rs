//! Configuration loading from disk.
//!
//! Static configuration is assembled in layers: built-in defaults, then the
//! TOML file (if any), then overrides coming from the environment and the
//! command line. Only values that were actually set override lower layers.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::dynamic::Configuration;
use crate::config::schema::{FileProviderConfig, StaticConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Values supplied by the environment or command-line flags.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub entry_point_address: Option<String>,
    pub log_level: Option<String>,
    pub grace_timeout: Option<String>,
    pub throttle_duration: Option<String>,
    pub provider_file: Option<PathBuf>,
    pub metrics_enabled: Option<bool>,
    pub metrics_address: Option<String>,
}

impl Overrides {
    /// Apply every value that was set on top of `config`.
    pub fn apply(&self, config: &mut StaticConfig) {
        if let Some(address) = &self.entry_point_address {
            // Overrides the first entry point, which is "web" for default configs.
            if let Some(entry_point) = config.entry_points.values_mut().next() {
                entry_point.address = address.clone();
            }
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        if let Some(grace) = &self.grace_timeout {
            config.lifecycle.grace_timeout = grace.clone();
        }
        if let Some(throttle) = &self.throttle_duration {
            config.providers.throttle_duration = throttle.clone();
        }
        if let Some(path) = &self.provider_file {
            let watch = config.providers.file.as_ref().map_or(true, |file| file.watch);
            config.providers.file = Some(FileProviderConfig {
                path: path.clone(),
                watch,
            });
        }
        if let Some(enabled) = self.metrics_enabled {
            config.metrics.enabled = enabled;
        }
        if let Some(address) = &self.metrics_address {
            config.metrics.address = address.clone();
        }
    }
}

/// Load and validate static configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<StaticConfig, ConfigError> {
    let config = read_toml(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Build the static configuration from defaults, an optional file and overrides.
pub fn load_layered(path: Option<&Path>, overrides: &Overrides) -> Result<StaticConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_toml(path)?,
        None => StaticConfig::default(),
    };
    overrides.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load a dynamic configuration document: JSON for `.json` files, TOML otherwise.
pub fn load_dynamic(path: &Path) -> Result<Configuration, ConfigError> {
    if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
        let content = read_file(path)?;
        return serde_json::from_str(&content).map_err(|source| ConfigError::ParseJson {
            path: path.to_path_buf(),
            source,
        });
    }
    read_toml(path)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = read_file(path)?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
