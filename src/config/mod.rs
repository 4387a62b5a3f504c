//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! Static configuration (read once):
//!     defaults
//!     → loader.rs (TOML file, then env/flag overrides)
//!     → validation.rs (semantic checks, all errors reported)
//!     → StaticConfig (immutable for the life of the process)
//!
//! Dynamic configuration (per provider, many times):
//!     provider (file, ...)
//!     → dynamic.rs (Configuration snapshot)
//!     → reload pipeline (throttle, merge, rebuild)
//! ```
//!
//! # Design Decisions
//! - Static config failures are fatal; dynamic config failures never are
//! - All fields have defaults to allow minimal configs
//! - Durations are human-readable strings parsed by duration.rs

pub mod duration;
pub mod dynamic;
pub mod loader;
pub mod schema;
pub mod validation;

pub use dynamic::Configuration;
pub use loader::{load_config, load_dynamic, load_layered, ConfigError, Overrides};
pub use schema::{EntryPointConfig, StaticConfig};
