//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (entry point, request id, forwarded headers)
//!     → routing (route table lookup) → middleware chain
//!     → forwarder.rs (server pick, URI rewrite, upstream call via client.rs)
//!     → response.rs (failure classification, body guards)
//!     → Send to client
//! ```

pub mod client;
pub mod forwarder;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{HttpServer, ServerError};
