//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Entry point config
//!     → listener.rs (parse address, bind, non-blocking)
//!     → tls.rs (optional certificate loading)
//!     → Hand off to HTTP layer (axum-server)
//! ```
//!
//! # Design Decisions
//! - All sockets are bound at startup; bind failures are fatal
//! - TLS is optional per entry point and handled transparently

pub mod listener;
pub mod tls;

pub use listener::{Listener, ListenerError};
