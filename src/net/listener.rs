//! Entry point listeners.
//!
//! # Responsibilities
//! - Parse and bind entry point addresses
//! - Hand std listeners to the server in non-blocking mode
//!
//! # Design Decisions
//! - Every entry point is bound before any traffic is served, so a bad
//!   address aborts startup instead of leaving a half-started router
//! - Port 0 binds an ephemeral port; `local_addr` reports the real one

use std::net::{SocketAddr, TcpListener};

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The address does not parse.
    #[error("invalid address {address:?}")]
    Address { address: String },
    /// Failed to bind to address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// A bound entry point socket.
#[derive(Debug)]
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to `address`.
    pub fn bind(address: &str) -> Result<Self, ListenerError> {
        let addr: SocketAddr = address.parse().map_err(|_| ListenerError::Address {
            address: address.to_string(),
        })?;
        let bind_error = |source| ListenerError::Bind { address: addr, source };

        let inner = TcpListener::bind(addr).map_err(bind_error)?;
        inner.set_nonblocking(true).map_err(bind_error)?;
        let local_addr = inner.local_addr().map_err(bind_error)?;

        tracing::info!(address = %local_addr, "Listener bound");
        Ok(Self { inner, local_addr })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn into_inner(self) -> TcpListener {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_ephemeral_port() {
        let listener = Listener::bind("127.0.0.1:0").unwrap();
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[test]
    fn reports_bad_addresses() {
        assert!(matches!(Listener::bind("nowhere"), Err(ListenerError::Address { .. })));

        let taken = Listener::bind("127.0.0.1:0").unwrap();
        let address = taken.local_addr().to_string();
        assert!(matches!(Listener::bind(&address), Err(ListenerError::Bind { .. })));
    }
}
