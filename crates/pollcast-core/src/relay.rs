//! Readiness dispatch loop.
//!
//! [`Relay`] owns the [`ConnectionTable`] and drives a [`Multiplexer`]: wait
//! for readiness, then walk the poll set in slot order and hand each ready
//! slot to exactly one handler:
//!
//! | Slot      | Observed  | Handler                                   |
//! |-----------|-----------|-------------------------------------------|
//! | listener  | readable  | accept, or reject with `too many users`   |
//! | client    | error     | log the pending socket error              |
//! | client    | hangup    | remove and close                          |
//! | client    | readable  | read one message, relay it to the others  |
//! | client    | writable  | write the staged payload, re-arm for read |
//!
//! Everything runs on the caller's thread. The wait is the only call that
//! blocks; every socket operation is nonblocking and a would-block result is
//! treated as a spurious wake.
//!
//! # Removal during a cycle
//!
//! Removing a client swaps the last slot into the current position. The loop
//! does not advance its index after a removal, so the swapped-in slot is still
//! dispatched in the same cycle.

use std::io;

use bytes::Bytes;

use crate::{
    connection::{ConnectionId, ConnectionRecord, ConnectionState, DEFAULT_BUFFER_SIZE},
    error::RelayError,
    interest::Readiness,
    mux::Multiplexer,
    table::{ConnectionTable, LISTENER_SLOT},
};

/// Default number of concurrent clients.
pub const DEFAULT_USER_LIMIT: usize = 5;

/// Sent to a client refused because every slot is taken.
pub const REJECTION_MESSAGE: &[u8] = b"too many users\n";

/// Relay configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Maximum concurrent clients
    pub user_limit: usize,
    /// Inbound buffer capacity per client, including the reserved byte
    pub buffer_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { user_limit: DEFAULT_USER_LIMIT, buffer_size: DEFAULT_BUFFER_SIZE }
    }
}

impl RelayConfig {
    /// Reject configurations the loop cannot run with.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.user_limit == 0 {
            return Err(RelayError::Config("user_limit must be at least 1".to_string()));
        }
        if self.buffer_size < 2 {
            return Err(RelayError::Config(format!(
                "buffer_size must be at least 2, got {}",
                self.buffer_size
            )));
        }
        Ok(())
    }

    /// Largest message a single read can produce.
    pub fn max_message_len(&self) -> usize {
        self.buffer_size.saturating_sub(1)
    }
}

/// Counters maintained by the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Completed wait/dispatch cycles
    pub cycles: u64,
    /// Clients admitted into the table
    pub accepted: u64,
    /// Clients refused for capacity
    pub rejected: u64,
    /// Failed accepts (other than would-block)
    pub accept_failures: u64,
    /// Clients removed after close, reset or hangup
    pub departed: u64,
    /// Messages read and relayed
    pub messages: u64,
    /// Staged payloads written to a client
    pub deliveries: u64,
    /// Staged payloads replaced before they were written
    pub overwritten: u64,
    /// Writes that sent fewer bytes than staged
    pub short_writes: u64,
}

/// Outcome of dispatching one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    /// The slot still holds the same connection
    Kept,
    /// The connection was removed and the slot now holds a different one
    Removed,
}

/// Broadcast relay over a readiness multiplexer.
pub struct Relay<M: Multiplexer> {
    /// Socket backend
    mux: M,
    /// Active connections and the poll set
    table: ConnectionTable,
    /// Limits
    config: RelayConfig,
    /// Counters
    stats: RelayStats,
}

impl<M: Multiplexer> Relay<M> {
    /// Create a relay over an already listening multiplexer.
    pub fn new(mux: M, config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;

        Ok(Self {
            mux,
            table: ConnectionTable::new(config.user_limit),
            config,
            stats: RelayStats::default(),
        })
    }

    /// Connection table.
    pub fn table(&self) -> &ConnectionTable {
        &self.table
    }

    /// Counters since creation.
    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Configuration in use.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Socket backend.
    pub fn multiplexer(&self) -> &M {
        &self.mux
    }

    /// Mutable socket backend.
    pub fn multiplexer_mut(&mut self) -> &mut M {
        &mut self.mux
    }

    /// Run cycles until the wait fails.
    ///
    /// Never returns `Ok`. The error is always [`RelayError::Wait`].
    pub fn run(&mut self) -> Result<(), RelayError> {
        loop {
            self.turn()?;
        }
    }

    /// Run one wait/dispatch cycle. Returns the number of ready slots.
    pub fn turn(&mut self) -> Result<usize, RelayError> {
        let ready = match self.mux.wait(self.table.slots_mut()) {
            Ok(ready) => ready,
            Err(e) => {
                tracing::error!(error = %e, "poll failure");
                return Err(RelayError::Wait(e));
            },
        };

        self.stats.cycles += 1;
        self.dispatch();
        Ok(ready)
    }

    /// Close every client and hand back the backend.
    ///
    /// Dropping the returned backend closes the listener.
    pub fn release(mut self) -> M {
        let ids: Vec<ConnectionId> = self.table.ids().collect();
        for id in ids {
            self.table.remove(id);
            self.mux.close(id);
        }
        tracing::debug!("connection table released");
        self.mux
    }

    /// Walk the poll set in slot order.
    fn dispatch(&mut self) {
        let mut index = LISTENER_SLOT;

        while let Some(slot) = self.table.slot(index) {
            let id = slot.id();
            let ready = self.table.take_ready(index);

            if ready.is_empty() {
                index += 1;
                continue;
            }

            match self.handle(index, id, ready) {
                Dispatch::Kept => index += 1,
                Dispatch::Removed => {},
            }
        }
    }

    fn handle(&mut self, index: usize, id: ConnectionId, ready: Readiness) -> Dispatch {
        if id.is_listener() {
            if ready.is_readable() {
                self.handle_accept();
            } else if ready.is_error() {
                self.handle_error(id);
            }
            return Dispatch::Kept;
        }

        if ready.is_error() {
            self.handle_error(id);
            Dispatch::Kept
        } else if ready.is_hangup() {
            self.remove(index, "peer hung up");
            Dispatch::Removed
        } else if ready.is_readable() {
            self.handle_read(index, id)
        } else if ready.is_writable() {
            self.handle_write(id);
            Dispatch::Kept
        } else {
            Dispatch::Kept
        }
    }

    /// Take one connection off the backlog and admit or refuse it.
    fn handle_accept(&mut self) {
        let accepted = match self.mux.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::debug!("listener woke with empty backlog");
                return;
            },
            Err(e) => {
                self.stats.accept_failures += 1;
                tracing::warn!(error = %e, "accept failed");
                return;
            },
        };

        if self.table.is_full() {
            tracing::info!(
                peer = %accepted.peer,
                limit = self.table.limit(),
                "too many users, refusing connection"
            );
            if let Err(e) = self.mux.send(accepted.id, REJECTION_MESSAGE) {
                tracing::debug!(peer = %accepted.peer, error = %e, "rejection notice not sent");
            }
            self.mux.close(accepted.id);
            self.stats.rejected += 1;
            return;
        }

        let record = ConnectionRecord::new(accepted.peer, self.config.buffer_size);
        match self.table.insert(accepted.id, record) {
            Ok(_) => {
                self.stats.accepted += 1;
                tracing::info!(
                    conn = %accepted.id,
                    peer = %accepted.peer,
                    active = self.table.active_count(),
                    "user connected"
                );
            },
            Err(e) => {
                tracing::warn!(conn = %accepted.id, error = %e, "admission failed");
                self.mux.close(accepted.id);
            },
        }
    }

    /// Report the pending socket error. The connection is left alone; a
    /// broken socket is removed by the read that follows.
    fn handle_error(&mut self, id: ConnectionId) {
        match self.mux.take_error(id) {
            Ok(Some(err)) => tracing::warn!(conn = %id, error = %err, "socket error"),
            Ok(None) => tracing::debug!(conn = %id, "error event without pending socket error"),
            Err(e) => tracing::warn!(conn = %id, error = %e, "socket error query failed"),
        }
    }

    /// Read one message and relay it.
    fn handle_read(&mut self, index: usize, id: ConnectionId) -> Dispatch {
        let result = match self.table.record_mut(id) {
            Some(record) => {
                let result = self.mux.recv(id, record.inbound_mut().read_window());
                if let Ok(n) = result {
                    record.inbound_mut().filled(n);
                }
                result
            },
            None => return Dispatch::Kept,
        };

        match result {
            Ok(0) => {
                self.remove(index, "peer closed connection");
                Dispatch::Removed
            },
            Ok(n) => {
                if let Some(record) = self.table.record(id) {
                    tracing::debug!(
                        conn = %id,
                        bytes = n,
                        text = %String::from_utf8_lossy(record.inbound().message()),
                        "received message"
                    );
                }
                self.broadcast(id);
                Dispatch::Kept
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::debug!(conn = %id, "read would block");
                Dispatch::Kept
            },
            Err(e) => {
                tracing::debug!(conn = %id, error = %e, "read failed");
                self.remove(index, "read error");
                Dispatch::Removed
            },
        }
    }

    /// Stage the sender's last message for every other client and arm them
    /// for writing. The sender keeps its read interest.
    fn broadcast(&mut self, sender: ConnectionId) {
        let Some(payload) =
            self.table.record(sender).map(|record| Bytes::copy_from_slice(record.inbound().message()))
        else {
            return;
        };

        self.stats.messages += 1;

        for index in (LISTENER_SLOT + 1)..self.table.slots().len() {
            let Some(target) = self.table.slot(index).map(|slot| slot.id()) else {
                continue;
            };
            if target == sender {
                continue;
            }

            let replaced =
                self.table.record_mut(target).and_then(|record| record.stage(payload.clone()));
            if replaced.is_some() {
                self.stats.overwritten += 1;
                tracing::debug!(conn = %target, "unsent payload replaced by newer message");
            }
            if let Err(e) = self.table.arm(target, ConnectionState::Sending) {
                tracing::warn!(conn = %target, error = %e, "failed to arm for writing");
            }
        }
    }

    /// Write the staged payload in one call and re-arm for reading.
    fn handle_write(&mut self, id: ConnectionId) {
        let Some(payload) = self.table.record(id).and_then(|record| record.pending().cloned())
        else {
            tracing::debug!(conn = %id, "writable with nothing staged");
            return;
        };

        match self.mux.send(id, &payload) {
            Ok(n) => {
                self.stats.deliveries += 1;
                if n < payload.len() {
                    self.stats.short_writes += 1;
                    tracing::debug!(conn = %id, sent = n, staged = payload.len(), "short write");
                } else {
                    tracing::debug!(conn = %id, bytes = n, "relayed message");
                }
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::debug!(conn = %id, "write would block");
                return;
            },
            Err(e) => {
                tracing::warn!(conn = %id, error = %e, "send failed, dropping staged payload");
            },
        }

        if let Some(record) = self.table.record_mut(id) {
            record.take_pending();
        }
        if let Err(e) = self.table.arm(id, ConnectionState::Receiving) {
            tracing::warn!(conn = %id, error = %e, "failed to re-arm for reading");
        }
    }

    /// Remove the client in slot `index` and close its socket.
    fn remove(&mut self, index: usize, reason: &str) {
        if let Some((id, record)) = self.table.remove_slot(index) {
            self.mux.close(id);
            self.stats.departed += 1;
            tracing::info!(
                conn = %id,
                peer = %record.peer(),
                reason,
                active = self.table.active_count(),
                "user left"
            );
        }
    }
}
