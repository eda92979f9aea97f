//! Sans-IO core of the pollcast relay.
//!
//! pollcast accepts a bounded number of TCP clients and relays every message
//! one client sends to all the others. This crate holds the relay logic with
//! no socket code of its own: the event loop talks to a [`Multiplexer`] that
//! the runtime provides (`mio` in production, an in-memory network in tests).
//!
//! # Components
//!
//! - [`ConnectionRecord`]: per-client peer address, inbound buffer, staged
//!   outbound payload
//! - [`ConnectionTable`]: dense slot array with swap-with-last removal
//! - [`Interest`] / [`Readiness`]: per-slot poll masks
//! - [`Multiplexer`]: the blocking wait plus nonblocking socket calls
//! - [`Relay`]: the wait/dispatch loop, admission control and broadcast

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
pub mod error;
pub mod interest;
pub mod mux;
pub mod relay;
pub mod table;

pub use connection::{
    ConnectionId, ConnectionRecord, ConnectionState, DEFAULT_BUFFER_SIZE, InboundBuffer,
};
pub use error::RelayError;
pub use interest::{Interest, Readiness};
pub use mux::{Accepted, Multiplexer};
pub use relay::{DEFAULT_USER_LIMIT, REJECTION_MESSAGE, Relay, RelayConfig, RelayStats};
pub use table::{ConnectionTable, LISTENER_SLOT, PollSlot};
