//! Per-client connection record.
//!
//! A record holds what the relay knows about one admitted client: where it
//! connected from, the scratch buffer the last read landed in, and the payload
//! staged for it by another client's broadcast.
//!
//! # State Machine
//!
//! ```text
//!            accept
//!              │
//!              ↓          relay staged        ┌─────────┐
//!        ┌───────────┐ ──────────────────────>│ Sending │
//!        │ Receiving │                        └─────────┘
//!        └───────────┘ <────────────────────────── │
//!              │            payload written
//!              │ close / reset / hangup
//!              ↓
//!         ┌────────┐
//!         │ Closed │ (record dropped, slot reclaimed)
//!         └────────┘
//! ```
//!
//! `Closed` is not represented on the record itself: removal from the
//! [`ConnectionTable`](crate::table::ConnectionTable) drops the record.

use std::{fmt, net::SocketAddr};

use bytes::Bytes;

/// Default inbound buffer capacity, including the reserved terminator byte.
pub const DEFAULT_BUFFER_SIZE: usize = 64;

/// Identifier of a connection, assigned by the multiplexer at accept time.
///
/// Identifier 0 is reserved for the listening socket.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ConnectionId(usize);

impl ConnectionId {
    /// The listening socket.
    pub const LISTENER: Self = Self(0);

    /// Wrap a raw identifier.
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Raw identifier value.
    pub const fn get(self) -> usize {
        self.0
    }

    /// True for the listening socket's identifier.
    pub const fn is_listener(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which direction a client slot is currently armed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for inbound data
    Receiving,
    /// Holding a staged payload for delivery
    Sending,
}

/// Fixed-capacity scratch buffer for inbound reads.
///
/// Each read overwrites the previous contents. One byte of capacity is held
/// back, so a single read never returns more than `capacity - 1` bytes.
#[derive(Debug, Clone)]
pub struct InboundBuffer {
    data: Box<[u8]>,
    len: usize,
}

impl InboundBuffer {
    /// Create a zeroed buffer with the given total capacity.
    pub fn new(capacity: usize) -> Self {
        Self { data: vec![0u8; capacity].into_boxed_slice(), len: 0 }
    }

    /// Total capacity, including the reserved byte.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Zero the buffer and return the writable window for the next read.
    pub fn read_window(&mut self) -> &mut [u8] {
        self.data.fill(0);
        self.len = 0;
        let limit = self.data.len().saturating_sub(1);
        &mut self.data[..limit]
    }

    /// Record that the last read produced `n` bytes.
    pub fn filled(&mut self, n: usize) {
        self.len = n.min(self.data.len().saturating_sub(1));
    }

    /// Bytes produced by the last read.
    pub fn message(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// State the relay keeps for one admitted client.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    peer: SocketAddr,
    inbound: InboundBuffer,
    pending: Option<Bytes>,
}

impl ConnectionRecord {
    /// Create a record for a freshly accepted peer.
    pub fn new(peer: SocketAddr, buffer_size: usize) -> Self {
        Self { peer, inbound: InboundBuffer::new(buffer_size), pending: None }
    }

    /// Address the client connected from.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Inbound scratch buffer.
    pub fn inbound(&self) -> &InboundBuffer {
        &self.inbound
    }

    /// Mutable inbound scratch buffer.
    pub fn inbound_mut(&mut self) -> &mut InboundBuffer {
        &mut self.inbound
    }

    /// Payload waiting to be written to this client, if any.
    pub fn pending(&self) -> Option<&Bytes> {
        self.pending.as_ref()
    }

    /// Current direction, derived from whether a payload is staged.
    pub fn state(&self) -> ConnectionState {
        if self.pending.is_some() { ConnectionState::Sending } else { ConnectionState::Receiving }
    }

    /// Stage `payload` for delivery.
    ///
    /// Only one payload is held: a payload that was staged and not yet written
    /// is replaced. Returns the replaced payload.
    pub fn stage(&mut self, payload: Bytes) -> Option<Bytes> {
        self.pending.replace(payload)
    }

    /// Take the staged payload, leaving nothing pending.
    pub fn take_pending(&mut self) -> Option<Bytes> {
        self.pending.take()
    }
}
