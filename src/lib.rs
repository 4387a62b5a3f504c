//! Dynamic edge router library.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod provider;
pub mod reload;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::{Configuration, StaticConfig};
pub use http::HttpServer;
pub use lifecycle::{EdgeRouter, Shutdown};
