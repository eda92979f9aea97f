//! pollcast production server.
//!
//! Wraps [`pollcast_core`]'s [`Relay`] with real sockets: a [`MioMultiplexer`]
//! owns the listening socket, the accepted streams and the poller, and the
//! relay drives it on the calling thread until the wait fails.
//!
//! # Components
//!
//! - [`Server`]: binds the listener and runs the relay loop
//! - [`MioMultiplexer`]: level-triggered [`Multiplexer`] over mio's
//!   edge-triggered poller
//!
//! [`Multiplexer`]: pollcast_core::Multiplexer

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod mio_mux;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub use error::ServerError;
pub use mio_mux::MioMultiplexer;
use pollcast_core::{Relay, RelayConfig};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 12345;

/// Server configuration for the production runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: IpAddr,
    /// Port to bind to (0 picks a free port)
    pub port: u16,
    /// Relay limits
    pub relay: RelayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            relay: RelayConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Socket address to listen on.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// Production pollcast server.
///
/// Wraps [`Relay`] with the mio backend.
pub struct Server {
    /// The relay loop over real sockets
    relay: Relay<MioMultiplexer>,
}

impl Server {
    /// Validate the configuration and bind the listener.
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.relay.validate()?;

        let addr = config.socket_addr();
        let mux = MioMultiplexer::bind(addr)
            .map_err(|e| ServerError::Transport(format!("failed to bind {addr}: {e}")))?;
        let relay = Relay::new(mux, config.relay)?;

        Ok(Self { relay })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.relay.multiplexer().local_addr()?)
    }

    /// Run the relay until the wait fails.
    ///
    /// Every client is closed before the error is returned.
    pub fn run(mut self) -> Result<(), ServerError> {
        let config = *self.relay.config();
        tracing::info!(
            addr = %self.local_addr()?,
            user_limit = config.user_limit,
            buffer_size = config.buffer_size,
            "relay listening"
        );

        let result = self.relay.run();
        let stats = self.relay.stats();
        drop(self.relay.release());

        tracing::info!(
            accepted = stats.accepted,
            rejected = stats.rejected,
            messages = stats.messages,
            "relay stopped"
        );
        result.map_err(ServerError::from)
    }
}
