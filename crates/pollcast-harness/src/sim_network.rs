//! In-memory network implementing [`Multiplexer`].
//!
//! [`SimNetwork`] is a shared handle: the test keeps one clone to play the
//! clients (connect, send, close, hang up, inject errors) and to observe what
//! the relay wrote back, while [`SimMultiplexer`] owns another clone inside the
//! relay.
//!
//! Readiness is computed from peer state on every wait, so the simulation is
//! level-triggered by construction. A wait that finds nothing ready returns
//! `Ok(0)` instead of blocking; [`SimRelay::run_until_idle`] uses that as its
//! stopping condition.
//!
//! [`SimRelay::run_until_idle`]: crate::sim_relay::SimRelay::run_until_idle

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    rc::Rc,
};

use bytes::Bytes;
use pollcast_core::{Accepted, ConnectionId, Multiplexer, PollSlot, Readiness};

/// First port handed out to simulated clients.
const FIRST_CLIENT_PORT: u16 = 40_000;

/// Client-side view of one simulated connection.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Default)]
struct PeerState {
    /// Client address
    addr: Option<SocketAddr>,
    /// Bytes written by the client and not yet read by the relay
    inbound: VecDeque<u8>,
    /// Client shut down its write half (orderly close)
    eof: bool,
    /// Client hung up (reported as a hangup event)
    hung_up: bool,
    /// Next read fails with this error
    read_error: Option<io::ErrorKind>,
    /// Pending socket error (reported as an error event)
    socket_error: Option<io::ErrorKind>,
    /// Writes by the relay would block
    stalled: bool,
    /// Upper bound on bytes accepted per write
    write_limit: Option<usize>,
    /// Each write the relay made, in order
    received: Vec<Bytes>,
    /// Relay closed this connection
    closed: bool,
}

/// Shared state of the simulated network.
#[derive(Debug, Default)]
struct NetworkState {
    peers: HashMap<ConnectionId, PeerState>,
    backlog: VecDeque<ConnectionId>,
    next_id: usize,
    accept_error: Option<io::ErrorKind>,
    wait_error: Option<io::ErrorKind>,
    error_query_fails: bool,
    waits: u64,
}

/// Handle to a simulated network. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SimNetwork {
    inner: Rc<RefCell<NetworkState>>,
}

impl SimNetwork {
    /// Create an empty network with a listening socket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Multiplexer to hand to the relay.
    pub fn multiplexer(&self) -> SimMultiplexer {
        SimMultiplexer { network: self.clone() }
    }

    /// Queue a client connection on the listener's backlog.
    ///
    /// Returns the identifier the relay will see when it accepts it.
    pub fn connect(&self) -> ConnectionId {
        let mut state = self.inner.borrow_mut();
        state.next_id += 1;
        let id = ConnectionId::new(state.next_id);
        let port = FIRST_CLIENT_PORT.wrapping_add(state.next_id as u16);
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);

        state.peers.insert(id, PeerState { addr: Some(addr), ..PeerState::default() });
        state.backlog.push_back(id);
        id
    }

    /// Client writes `data` to the relay.
    pub fn send(&self, id: ConnectionId, data: &[u8]) {
        self.with_peer(id, |peer| peer.inbound.extend(data.iter().copied()));
    }

    /// Client shuts down its write half. The relay reads EOF once pending
    /// bytes are drained.
    pub fn shutdown(&self, id: ConnectionId) {
        self.with_peer(id, |peer| peer.eof = true);
    }

    /// Client hangs up; reported as a hangup event.
    pub fn hang_up(&self, id: ConnectionId) {
        self.with_peer(id, |peer| peer.hung_up = true);
    }

    /// Connection is reset; the next read fails with `ConnectionReset`.
    pub fn reset(&self, id: ConnectionId) {
        self.with_peer(id, |peer| peer.read_error = Some(io::ErrorKind::ConnectionReset));
    }

    /// Raise a pending socket error, reported as an error event until taken.
    pub fn raise_socket_error(&self, id: ConnectionId, kind: io::ErrorKind) {
        self.with_peer(id, |peer| peer.socket_error = Some(kind));
    }

    /// Make relay writes to `id` block (or unblock them).
    pub fn stall_writes(&self, id: ConnectionId, stalled: bool) {
        self.with_peer(id, |peer| peer.stalled = stalled);
    }

    /// Accept at most `limit` bytes per relay write to `id`.
    pub fn limit_writes(&self, id: ConnectionId, limit: usize) {
        self.with_peer(id, |peer| peer.write_limit = Some(limit));
    }

    /// Fail the next accept with `kind`.
    pub fn fail_next_accept(&self, kind: io::ErrorKind) {
        self.inner.borrow_mut().accept_error = Some(kind);
    }

    /// Fail the next wait with `kind`.
    pub fn fail_next_wait(&self, kind: io::ErrorKind) {
        self.inner.borrow_mut().wait_error = Some(kind);
    }

    /// Make socket error queries fail.
    pub fn fail_error_queries(&self, fail: bool) {
        self.inner.borrow_mut().error_query_fails = fail;
    }

    /// Each write the relay made to `id`.
    pub fn received(&self, id: ConnectionId) -> Vec<Bytes> {
        self.inner.borrow().peers.get(&id).map(|peer| peer.received.clone()).unwrap_or_default()
    }

    /// Everything the relay wrote to `id`, concatenated.
    pub fn received_bytes(&self, id: ConnectionId) -> Vec<u8> {
        self.received(id).iter().flat_map(|chunk| chunk.iter().copied()).collect()
    }

    /// True once the relay closed `id`.
    pub fn is_closed(&self, id: ConnectionId) -> bool {
        self.inner.borrow().peers.get(&id).is_some_and(|peer| peer.closed)
    }

    /// Address the client connected from.
    pub fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.inner.borrow().peers.get(&id).and_then(|peer| peer.addr)
    }

    /// Connections still waiting on the listener's backlog.
    pub fn backlog_len(&self) -> usize {
        self.inner.borrow().backlog.len()
    }

    /// Number of waits performed.
    pub fn waits(&self) -> u64 {
        self.inner.borrow().waits
    }

    fn with_peer(&self, id: ConnectionId, f: impl FnOnce(&mut PeerState)) {
        if let Some(peer) = self.inner.borrow_mut().peers.get_mut(&id).filter(|peer| !peer.closed) {
            f(peer);
        }
    }
}

impl NetworkState {
    fn observe(&self, id: ConnectionId) -> Readiness {
        let mut ready = Readiness::empty();

        if id.is_listener() {
            if !self.backlog.is_empty() || self.accept_error.is_some() {
                ready.insert(Readiness::READABLE);
            }
            return ready;
        }

        let Some(peer) = self.peers.get(&id) else {
            return ready;
        };
        if peer.closed {
            return ready;
        }

        if !peer.inbound.is_empty() || peer.eof || peer.read_error.is_some() {
            ready.insert(Readiness::READABLE);
        }
        if !peer.stalled {
            ready.insert(Readiness::WRITABLE);
        }
        if peer.hung_up {
            ready.insert(Readiness::HANGUP);
        }
        if peer.socket_error.is_some() {
            ready.insert(Readiness::ERROR);
        }
        ready
    }

    fn open_peer(&mut self, id: ConnectionId) -> io::Result<&mut PeerState> {
        match self.peers.get_mut(&id) {
            Some(peer) if !peer.closed => Ok(peer),
            _ => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }
}

/// [`Multiplexer`] backed by a [`SimNetwork`].
#[derive(Debug, Clone)]
pub struct SimMultiplexer {
    network: SimNetwork,
}

impl SimMultiplexer {
    /// Network this multiplexer serves.
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }
}

impl Multiplexer for SimMultiplexer {
    fn wait(&mut self, slots: &mut [PollSlot]) -> io::Result<usize> {
        let mut state = self.network.inner.borrow_mut();
        state.waits += 1;

        if let Some(kind) = state.wait_error.take() {
            return Err(io::Error::from(kind));
        }

        let mut ready = 0;
        for slot in slots.iter_mut() {
            slot.set_ready(state.observe(slot.id()));
            if !slot.ready().is_empty() {
                ready += 1;
            }
        }
        Ok(ready)
    }

    fn accept(&mut self) -> io::Result<Accepted> {
        let mut state = self.network.inner.borrow_mut();

        if let Some(kind) = state.accept_error.take() {
            return Err(io::Error::from(kind));
        }

        let id = state.backlog.pop_front().ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
        let peer = state
            .peers
            .get(&id)
            .and_then(|peer| peer.addr)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        Ok(Accepted { id, peer })
    }

    fn recv(&mut self, id: ConnectionId, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.network.inner.borrow_mut();
        let peer = state.open_peer(id)?;

        if let Some(kind) = peer.read_error.take() {
            return Err(io::Error::from(kind));
        }

        if peer.inbound.is_empty() {
            return if peer.eof { Ok(0) } else { Err(io::Error::from(io::ErrorKind::WouldBlock)) };
        }

        let n = buf.len().min(peer.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(peer.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn send(&mut self, id: ConnectionId, data: &[u8]) -> io::Result<usize> {
        let mut state = self.network.inner.borrow_mut();
        let peer = state.open_peer(id)?;

        if peer.stalled {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }

        let n = peer.write_limit.map_or(data.len(), |limit| limit.min(data.len()));
        peer.received.push(Bytes::copy_from_slice(&data[..n]));
        Ok(n)
    }

    fn take_error(&mut self, id: ConnectionId) -> io::Result<Option<io::Error>> {
        let mut state = self.network.inner.borrow_mut();

        if state.error_query_fails {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }

        let peer = state.open_peer(id)?;
        Ok(peer.socket_error.take().map(io::Error::from))
    }

    fn close(&mut self, id: ConnectionId) {
        if let Some(peer) = self.network.inner.borrow_mut().peers.get_mut(&id) {
            peer.closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use pollcast_core::{Interest, RelayConfig};

    use super::*;
    use crate::sim_relay::SimRelay;

    #[test]
    fn accept_returns_backlog_in_order() {
        let network = SimNetwork::new();
        let mut mux = network.multiplexer();

        let a = network.connect();
        let b = network.connect();

        assert_eq!(mux.accept().unwrap().id, a);
        assert_eq!(mux.accept().unwrap().id, b);
        assert_eq!(mux.accept().unwrap_err().kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn recv_drains_up_to_buffer_then_would_block() {
        let network = SimNetwork::new();
        let mut mux = network.multiplexer();
        let id = network.connect();
        network.send(id, b"hello world");

        let mut buf = [0u8; 5];
        assert_eq!(mux.recv(id, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(mux.recv(id, &mut [0u8; 16]).unwrap(), 6);
        assert_eq!(mux.recv(id, &mut buf).unwrap_err().kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn eof_is_read_after_pending_bytes() {
        let network = SimNetwork::new();
        let mut mux = network.multiplexer();
        let id = network.connect();
        network.send(id, b"bye");
        network.shutdown(id);

        assert_eq!(mux.recv(id, &mut [0u8; 8]).unwrap(), 3);
        assert_eq!(mux.recv(id, &mut [0u8; 8]).unwrap(), 0);
    }

    #[test]
    fn wait_reports_only_requested_directions() {
        let network = SimNetwork::new();
        let mut sim = SimRelay::new(&network, RelayConfig::default());
        let id = network.connect();
        sim.run_until_idle();

        network.send(id, b"x");
        let mut mux = network.multiplexer();
        let mut slots = sim.relay().table().slots().to_vec();
        mux.wait(&mut slots).unwrap();

        assert_eq!(slots[1].interest(), Interest::RECEIVING);
        assert_eq!(slots[1].ready(), Readiness::READABLE);
    }

    #[test]
    fn closed_peer_refuses_io() {
        let network = SimNetwork::new();
        let mut mux = network.multiplexer();
        let id = network.connect();
        mux.close(id);

        assert!(network.is_closed(id));
        assert_eq!(mux.send(id, b"x").unwrap_err().kind(), io::ErrorKind::NotConnected);
        assert_eq!(mux.recv(id, &mut [0u8; 4]).unwrap_err().kind(), io::ErrorKind::NotConnected);
    }
}
