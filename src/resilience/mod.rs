//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Service chain:
//!     → retries.rs (re-run on network errors, different server each time)
//!     → circuit_breaker.rs (expression over rolling.rs stats, 503 when tripped)
//!     → forwarder
//! ```
//!
//! # Design Decisions
//! - Only transport failures are retried; responses pass through untouched
//! - Circuit breakers are evaluated per request, without timers
//! - All resilience logic is composable middleware

pub mod backoff;
pub mod circuit_breaker;
pub mod expression;
pub mod retries;
pub mod rolling;
