//! [`Multiplexer`] over `mio` TCP sockets.
//!
//! mio reports readiness edge-triggered: an event fires when a socket becomes
//! ready, not while it stays ready. The relay expects level-triggered waits,
//! where a socket that still has unread data is reported again on every wait.
//! [`MioMultiplexer`] bridges the two by keeping the last observed readiness
//! per socket until an operation on that socket returns would-block:
//!
//! ```text
//!   event: readable ──► sticky READABLE ──► recv() == WouldBlock ──► cleared
//!   event: writable ──► sticky WRITABLE ──► send() == WouldBlock ──► cleared
//!   event: read closed ─► sticky HANGUP (until close)
//!   event: error ─────► ERROR (reported once)
//! ```
//!
//! When any slot already has sticky readiness matching its interest, the wait
//! polls with a zero timeout so the slot is dispatched again without blocking.
//!
//! Interest changes made by the relay between waits are pushed to the poller
//! lazily, right before the next poll.

use std::{
    collections::HashMap,
    io::{self, Read, Write},
    net::SocketAddr,
    time::Duration,
};

use mio::{
    Events, Poll, Token,
    event::Event,
    net::{TcpListener, TcpStream},
};
use pollcast_core::{Accepted, ConnectionId, Interest, Multiplexer, PollSlot, Readiness};

/// Events drained from the poller per wait.
const EVENT_CAPACITY: usize = 128;

/// Token of the listening socket.
const LISTENER_TOKEN: Token = Token(0);

/// One accepted stream and its poller bookkeeping.
struct Registered {
    stream: TcpStream,
    /// Interest currently registered with the poller
    registered: mio::Interest,
    /// Readiness observed and not yet exhausted
    ready: Readiness,
}

/// Production backend: a mio [`Poll`] with one listener and the accepted
/// streams.
pub struct MioMultiplexer {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    listener_ready: Readiness,
    streams: HashMap<ConnectionId, Registered>,
    next_id: usize,
}

impl MioMultiplexer {
    /// Bind a nonblocking listener on `addr` and register it for reading.
    ///
    /// On Unix the listener has `SO_REUSEADDR` set, so a restarted relay can
    /// rebind while old connections linger in `TIME_WAIT`.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(addr)?;
        poll.registry().register(&mut listener, LISTENER_TOKEN, mio::Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            listener,
            listener_ready: Readiness::empty(),
            streams: HashMap::new(),
            next_id: ConnectionId::LISTENER.get(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of open client streams, including ones not yet admitted.
    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }

    /// Push interest changes to the poller and decide whether the next poll
    /// may block.
    fn sync(&mut self, slots: &[PollSlot]) -> io::Result<Option<Duration>> {
        let mut pending = false;

        for slot in slots {
            let id = slot.id();
            if id.is_listener() {
                pending |= !self.listener_ready.filter(slot.interest()).is_empty();
                continue;
            }

            let Some(entry) = self.streams.get_mut(&id) else {
                continue;
            };

            let wanted = to_mio(slot.interest());
            if wanted != entry.registered {
                self.poll.registry().reregister(&mut entry.stream, token(id), wanted)?;
                entry.registered = wanted;
            }
            pending |= !entry.ready.filter(slot.interest()).is_empty();
        }

        Ok(if pending { Some(Duration::ZERO) } else { None })
    }

    /// Fold the drained events into the sticky readiness.
    fn absorb(&mut self) {
        for event in &self.events {
            let observed = from_mio(event);
            if event.token() == LISTENER_TOKEN {
                self.listener_ready.insert(observed);
                continue;
            }

            let id = ConnectionId::new(event.token().0);
            if let Some(entry) = self.streams.get_mut(&id) {
                entry.ready.insert(observed);
            }
        }
    }

    fn stream(&mut self, id: ConnectionId) -> io::Result<&mut Registered> {
        self.streams.get_mut(&id).ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl Multiplexer for MioMultiplexer {
    fn wait(&mut self, slots: &mut [PollSlot]) -> io::Result<usize> {
        let timeout = self.sync(slots)?;

        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e),
            }
        }
        self.absorb();

        let mut ready = 0;
        for slot in slots.iter_mut() {
            let id = slot.id();
            let observed = if id.is_listener() {
                self.listener_ready
            } else if let Some(entry) = self.streams.get_mut(&id) {
                let observed = entry.ready;
                entry.ready.remove(Readiness::ERROR);
                observed
            } else {
                Readiness::empty()
            };

            slot.set_ready(observed);
            if !slot.ready().is_empty() {
                ready += 1;
            }
        }
        self.listener_ready.remove(Readiness::ERROR);

        Ok(ready)
    }

    fn accept(&mut self) -> io::Result<Accepted> {
        let (mut stream, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                if e.kind() == io::ErrorKind::WouldBlock {
                    self.listener_ready.remove(Readiness::READABLE);
                }
                return Err(e);
            },
        };

        self.next_id += 1;
        let id = ConnectionId::new(self.next_id);
        self.poll.registry().register(&mut stream, token(id), mio::Interest::READABLE)?;
        self.streams.insert(id, Registered {
            stream,
            registered: mio::Interest::READABLE,
            ready: Readiness::empty(),
        });

        Ok(Accepted { id, peer })
    }

    fn recv(&mut self, id: ConnectionId, buf: &mut [u8]) -> io::Result<usize> {
        let entry = self.stream(id)?;
        let result = entry.stream.read(buf);
        if matches!(&result, Err(e) if e.kind() == io::ErrorKind::WouldBlock) {
            entry.ready.remove(Readiness::READABLE);
        }
        result
    }

    fn send(&mut self, id: ConnectionId, data: &[u8]) -> io::Result<usize> {
        let entry = self.stream(id)?;
        let result = entry.stream.write(data);
        if matches!(&result, Err(e) if e.kind() == io::ErrorKind::WouldBlock) {
            entry.ready.remove(Readiness::WRITABLE);
        }
        result
    }

    fn take_error(&mut self, id: ConnectionId) -> io::Result<Option<io::Error>> {
        self.stream(id)?.stream.take_error()
    }

    fn close(&mut self, id: ConnectionId) {
        let Some(mut entry) = self.streams.remove(&id) else {
            return;
        };
        if let Err(e) = self.poll.registry().deregister(&mut entry.stream) {
            tracing::debug!(conn = %id, error = %e, "deregister failed");
        }
    }
}

fn token(id: ConnectionId) -> Token {
    Token(id.get())
}

/// Registered directions for a slot interest. Hangup and error are always
/// reported by the poller.
fn to_mio(interest: Interest) -> mio::Interest {
    if interest.is_writable() && !interest.is_readable() {
        mio::Interest::WRITABLE
    } else if interest.is_writable() {
        mio::Interest::READABLE | mio::Interest::WRITABLE
    } else {
        mio::Interest::READABLE
    }
}

fn from_mio(event: &Event) -> Readiness {
    let mut ready = Readiness::empty();
    if event.is_readable() {
        ready.insert(Readiness::READABLE);
    }
    if event.is_writable() {
        ready.insert(Readiness::WRITABLE);
    }
    if event.is_read_closed() {
        ready.insert(Readiness::HANGUP);
    }
    if event.is_error() {
        ready.insert(Readiness::ERROR);
    }
    ready
}
