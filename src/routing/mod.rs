//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Reload:
//!     MergedConfiguration
//!     → builder.rs (rule.rs parse, middleware chains, service tails)
//!     → router.rs (RouteTable per entry point, atomic swap)
//!
//! Request:
//!     EntryPointRouter::dispatch
//!     → matcher.rs (first route whose conditions all match)
//!     → route chain, or 404
//! ```
//!
//! # Design Decisions
//! - Tables are immutable; reloads swap whole tables
//! - Deterministic: same input always matches same route
//! - First match wins (ordered by priority)

pub mod builder;
pub mod matcher;
pub mod router;
pub mod rule;

pub use builder::{BuildError, RouteBuilder};
pub use router::{EntryPointRouter, RouteTable};
