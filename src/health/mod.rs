//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs), one task per pool:
//!     Periodic timer
//!     → Probe each server of the pool snapshot
//!     → Update state.rs
//!
//! Request path:
//!     BackendPool::next_server → atomic load of the state
//! ```
//!
//! # Design Decisions
//! - Unhealthy servers are skipped, never removed from the pool
//! - A single probe result flips the state (no hysteresis)
//! - Health state is per-server and survives reloads with the pool

pub mod active;
pub mod state;

pub use active::{HealthCheckSettings, HealthChecker};
pub use state::{HealthState, HealthStatus};
