//! Deterministic simulation harness for pollcast testing.
//!
//! In-memory implementation of the [`Multiplexer`] trait so the relay loop can
//! be driven cycle by cycle without sockets, timing or threads.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation. Operations are
//! applied to both the model and the relay, and their observable states
//! (admitted clients, bytes each client received, who was closed) are
//! compared.
//!
//! [`Multiplexer`]: pollcast_core::Multiplexer

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod sim_network;
pub mod sim_relay;

pub use model::{ClientIndex, ClientStatus, ModelClient, ModelRelay, Operation};
pub use sim_network::{SimMultiplexer, SimNetwork};
pub use sim_relay::{MAX_IDLE_CYCLES, SimRelay};
