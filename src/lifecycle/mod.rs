//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Metrics → Bind entry points → Reload pipeline → Providers → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain in-flight requests
//!     → Stop background tasks (tasks.rs) → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: metrics first, listeners before providers
//! - Shutdown has a timeout: stragglers are aborted after the grace period

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod tasks;

pub use shutdown::Shutdown;
pub use startup::{EdgeRouter, StartupError};
pub use tasks::TaskPool;
