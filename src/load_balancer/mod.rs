//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → service identified
//!     → manager.rs (service name → BackendPool)
//!     → pool.rs (snapshot of available servers, sticky cookie lookup)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (weighted, cumulative cursor)
//!         - least_conn.rs (fewest in-flight requests per unit of weight)
//!     → backend.rs (in-flight guard held until the response body ends)
//! ```
//!
//! # Design Decisions
//! - Algorithms only see the servers that are currently eligible
//! - Server lists are copy-on-write snapshots; readers never wait on writers
//! - Unhealthy servers stay in the pool and return once healthy again

use std::sync::Arc;

pub mod backend;
pub mod least_conn;
pub mod manager;
pub mod pool;
pub mod round_robin;
pub mod sticky;

pub use backend::{InFlightGuard, Server};
pub use manager::ServiceManager;
pub use pool::{BackendPool, PoolError, Selection};

/// A server selection strategy.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Pick one of `servers`, all of which are eligible.
    fn next_server(&self, servers: &[Arc<Server>]) -> Option<Arc<Server>>;
}
