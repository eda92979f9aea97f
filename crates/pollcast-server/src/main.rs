//! pollcast relay server binary.
//!
//! # Usage
//!
//! ```bash
//! # Relay between up to five clients on port 12345
//! pollcast-server 0.0.0.0 12345
//!
//! # Larger room, verbose logging
//! pollcast-server 127.0.0.1 12345 --user-limit 20 --log-level debug
//! ```

use std::net::IpAddr;

use clap::Parser;
use pollcast_core::{DEFAULT_BUFFER_SIZE, DEFAULT_USER_LIMIT, RelayConfig};
use pollcast_server::{Server, ServerConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Readiness-multiplexed TCP broadcast relay
#[derive(Parser, Debug)]
#[command(name = "pollcast-server")]
#[command(about = "Relay every client's messages to all other connected clients")]
#[command(version)]
struct Args {
    /// Address to bind to
    address: IpAddr,

    /// Port to listen on
    port: u16,

    /// Maximum concurrent clients
    #[arg(long, default_value_t = DEFAULT_USER_LIMIT)]
    user_limit: usize,

    /// Per-client read buffer size in bytes (one byte is reserved)
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ServerConfig {
        bind_address: args.address,
        port: args.port,
        relay: RelayConfig { user_limit: args.user_limit, buffer_size: args.buffer_size },
    };

    let server = Server::bind(config)?;
    server.run()?;

    Ok(())
}
