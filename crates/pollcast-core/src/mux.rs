//! Readiness multiplexer abstraction.
//!
//! Decouples the relay loop from real sockets. The production server
//! implements this over `mio`; the test harness implements it over an
//! in-memory network so dispatch order and table mutations can be checked
//! deterministically.
//!
//! The multiplexer owns the listening socket and every accepted stream. The
//! relay refers to them only by [`ConnectionId`] and keeps the interest masks
//! in its [`ConnectionTable`](crate::table::ConnectionTable); a wait receives
//! the current poll set and reports what it observed into it.

use std::{io, net::SocketAddr};

use crate::{connection::ConnectionId, table::PollSlot};

/// A connection taken off the listener's backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    /// Identifier the multiplexer assigned to the stream
    pub id: ConnectionId,
    /// Remote address of the client
    pub peer: SocketAddr,
}

/// Single blocking readiness wait plus nonblocking socket operations.
///
/// # Invariants
///
/// Implementations MUST guarantee:
///
/// - `wait()` blocks until at least one slot in the poll set has an observed
///   condition, then stores the observation in every slot via
///   [`PollSlot::set_ready`]. It never returns readiness for an identifier
///   that is not in the poll set.
/// - Readiness is level-triggered from the caller's point of view: a slot
///   observed readable stays readable on subsequent waits until a `recv` or
///   `accept` on it reports [`io::ErrorKind::WouldBlock`]. Same for writable
///   and `send`.
/// - Every stream returned by `accept()` is already nonblocking. `recv`,
///   `send` and `accept` never block.
/// - Identifiers are never reused while the previous holder is open.
pub trait Multiplexer {
    /// Block until a slot in `slots` is ready. Returns the number of slots
    /// with a non-empty observation.
    ///
    /// An error here is fatal for the relay.
    fn wait(&mut self, slots: &mut [PollSlot]) -> io::Result<usize>;

    /// Accept one pending connection from the listener.
    fn accept(&mut self) -> io::Result<Accepted>;

    /// Read into `buf`. `Ok(0)` means the peer closed its write half.
    fn recv(&mut self, id: ConnectionId, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `data` in a single call. May write fewer bytes than given.
    fn send(&mut self, id: ConnectionId, data: &[u8]) -> io::Result<usize>;

    /// Take the pending socket error (`SO_ERROR`) of `id`, if any.
    fn take_error(&mut self, id: ConnectionId) -> io::Result<Option<io::Error>>;

    /// Close `id` and release everything the multiplexer holds for it.
    fn close(&mut self, id: ConnectionId);
}

impl<M: Multiplexer + ?Sized> Multiplexer for &mut M {
    fn wait(&mut self, slots: &mut [PollSlot]) -> io::Result<usize> {
        (**self).wait(slots)
    }

    fn accept(&mut self) -> io::Result<Accepted> {
        (**self).accept()
    }

    fn recv(&mut self, id: ConnectionId, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv(id, buf)
    }

    fn send(&mut self, id: ConnectionId, data: &[u8]) -> io::Result<usize> {
        (**self).send(id, data)
    }

    fn take_error(&mut self, id: ConnectionId) -> io::Result<Option<io::Error>> {
        (**self).take_error(id)
    }

    fn close(&mut self, id: ConnectionId) {
        (**self).close(id);
    }
}
