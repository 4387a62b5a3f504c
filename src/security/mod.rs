//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (X-Forwarded-* policy per entry point)
//!     → configured middlewares:
//!         access_control.rs (IP whitelist)
//!         auth.rs (basic auth)
//!         rate_limit.rs (per-IP token buckets)
//!     → limits.rs (max connections, buffering) on the service tail
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - No trust in client input unless the peer is explicitly trusted

pub mod access_control;
pub mod auth;
pub mod headers;
pub mod limits;
pub mod rate_limit;
