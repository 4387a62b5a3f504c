//! Configuration providers.
//!
//! # Data Flow
//! ```text
//! Provider::init (once, at startup)
//! Provider::provide(tx, pool)
//!     → spawns watchers on the task pool
//!     → tx.send(ConfigMessage { provider_name, configuration })  (any time)
//!     → configuration: None signals the end of the provider's stream
//! ```

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::config::dynamic::Configuration;
use crate::lifecycle::TaskPool;

pub mod file;

pub use file::FileProvider;

/// One configuration snapshot from one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigMessage {
    pub provider_name: String,
    pub configuration: Option<Configuration>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider {provider}: {path:?} not found")]
    NotFound { provider: String, path: PathBuf },

    #[error("provider {provider}: {source}")]
    Config {
        provider: String,
        #[source]
        source: crate::config::ConfigError,
    },

    #[error("provider {provider}: watch failed: {source}")]
    Watch {
        provider: String,
        #[source]
        source: notify::Error,
    },
}

/// A source of dynamic configuration.
pub trait Provider: Send {
    fn name(&self) -> &str;

    /// Validate settings before anything is spawned.
    fn init(&mut self) -> Result<(), ProviderError>;

    /// Start pushing configurations into `tx`.
    fn provide(&self, tx: mpsc::UnboundedSender<ConfigMessage>, pool: &TaskPool) -> Result<(), ProviderError>;
}
