//! Dense, capacity-bounded connection table.
//!
//! The table has two halves:
//!
//! - A slot array (the poll set). Slot 0 is the listening socket; slots
//!   `1..=active_count` are the admitted clients, with no holes. Each slot
//!   carries the interest mask handed to the multiplexer and the readiness it
//!   observed.
//! - A record map from [`ConnectionId`] to [`ConnectionRecord`], plus a
//!   position index from identifier to slot. Both give O(1) lookup.
//!
//! Removal swaps the last slot into the vacated position, so removal is O(1)
//! and the slot array stays dense. Slot order is therefore not stable across
//! removals. Callers iterating by slot index must re-examine the current index
//! after a removal, since it now holds the record that used to be last.
//!
//! The slot array is allocated once at `user_limit + 1` entries and never
//! grows past it.

use std::collections::HashMap;

use crate::{
    connection::{ConnectionId, ConnectionRecord, ConnectionState},
    error::RelayError,
    interest::{Interest, Readiness},
};

/// Index of the listening socket in the slot array.
pub const LISTENER_SLOT: usize = 0;

/// One entry of the poll set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSlot {
    id: ConnectionId,
    interest: Interest,
    ready: Readiness,
}

impl PollSlot {
    fn new(id: ConnectionId, interest: Interest) -> Self {
        Self { id, interest, ready: Readiness::empty() }
    }

    /// Connection occupying this slot.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Conditions this slot wants to be woken for.
    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// Conditions observed by the last wait.
    pub fn ready(&self) -> Readiness {
        self.ready
    }

    /// Store the conditions observed by a wait.
    ///
    /// Readable and writable are dropped unless the slot's interest asks for
    /// them.
    pub fn set_ready(&mut self, ready: Readiness) {
        self.ready = ready.filter(self.interest);
    }
}

/// Active connections of the relay.
#[derive(Debug)]
pub struct ConnectionTable {
    /// Listener slot followed by one slot per active connection
    slots: Vec<PollSlot>,
    /// Connection ID → record
    records: HashMap<ConnectionId, ConnectionRecord>,
    /// Connection ID → slot index
    positions: HashMap<ConnectionId, usize>,
    /// Maximum number of active connections
    limit: usize,
}

impl ConnectionTable {
    /// Create an empty table admitting at most `limit` connections.
    pub fn new(limit: usize) -> Self {
        let mut slots = Vec::with_capacity(limit + 1);
        slots.push(PollSlot::new(ConnectionId::LISTENER, Interest::LISTENER));

        Self {
            slots,
            records: HashMap::with_capacity(limit),
            positions: HashMap::with_capacity(limit),
            limit,
        }
    }

    /// Maximum number of active connections.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of active connections.
    pub fn active_count(&self) -> usize {
        self.slots.len() - 1
    }

    /// True when no further connection can be admitted.
    pub fn is_full(&self) -> bool {
        self.active_count() >= self.limit
    }

    /// True when no client is connected.
    pub fn is_empty(&self) -> bool {
        self.active_count() == 0
    }

    /// Admit a connection into the next free slot.
    ///
    /// The new slot is armed with [`Interest::RECEIVING`]. Returns the slot
    /// index.
    pub fn insert(
        &mut self,
        id: ConnectionId,
        record: ConnectionRecord,
    ) -> Result<usize, RelayError> {
        if self.is_full() {
            return Err(RelayError::TableFull { limit: self.limit });
        }
        if id.is_listener() || self.records.contains_key(&id) {
            return Err(RelayError::DuplicateConnection(id));
        }

        let index = self.slots.len();
        self.slots.push(PollSlot::new(id, Interest::RECEIVING));
        self.records.insert(id, record);
        self.positions.insert(id, index);
        Ok(index)
    }

    /// Remove the connection in slot `index` by swapping the last slot into
    /// its place.
    ///
    /// Returns `None` for the listener slot or an index past the active range.
    pub fn remove_slot(&mut self, index: usize) -> Option<(ConnectionId, ConnectionRecord)> {
        if index == LISTENER_SLOT || index >= self.slots.len() {
            return None;
        }

        let removed = self.slots.swap_remove(index);
        if let Some(moved) = self.slots.get(index) {
            self.positions.insert(moved.id, index);
        }
        self.positions.remove(&removed.id);
        let record = self.records.remove(&removed.id)?;
        Some((removed.id, record))
    }

    /// Remove a connection by identifier.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionRecord> {
        let index = self.position(id)?;
        self.remove_slot(index).map(|(_, record)| record)
    }

    /// Slot index currently held by `id`.
    pub fn position(&self, id: ConnectionId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    /// True if `id` is an active connection.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.records.contains_key(&id)
    }

    /// Slot at `index`, if within the active range.
    pub fn slot(&self, index: usize) -> Option<&PollSlot> {
        self.slots.get(index)
    }

    /// The listener slot followed by every active slot.
    pub fn slots(&self) -> &[PollSlot] {
        &self.slots
    }

    /// Mutable poll set, handed to the multiplexer for a wait.
    pub fn slots_mut(&mut self) -> &mut [PollSlot] {
        &mut self.slots
    }

    /// Active connection identifiers in slot order.
    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.slots.iter().skip(1).map(|slot| slot.id)
    }

    /// Record for `id`.
    pub fn record(&self, id: ConnectionId) -> Option<&ConnectionRecord> {
        self.records.get(&id)
    }

    /// Mutable record for `id`.
    pub fn record_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionRecord> {
        self.records.get_mut(&id)
    }

    /// Interest mask of `id`.
    pub fn interest(&self, id: ConnectionId) -> Option<Interest> {
        let index = self.position(id)?;
        self.slots.get(index).map(|slot| slot.interest)
    }

    /// Replace the interest mask of `id`.
    pub fn set_interest(&mut self, id: ConnectionId, interest: Interest) -> Result<(), RelayError> {
        let index = self.position(id).ok_or(RelayError::UnknownConnection(id))?;
        let slot = self.slots.get_mut(index).ok_or(RelayError::UnknownConnection(id))?;
        slot.interest = interest;
        Ok(())
    }

    /// Arm `id` for one direction, keeping its error and hangup interest.
    pub fn arm(&mut self, id: ConnectionId, state: ConnectionState) -> Result<(), RelayError> {
        let current = self.interest(id).ok_or(RelayError::UnknownConnection(id))?;
        let next = match state {
            ConnectionState::Receiving => current.to_receiving(),
            ConnectionState::Sending => current.to_sending(),
        };
        self.set_interest(id, next)
    }

    /// Take the readiness observed for slot `index`, leaving it empty.
    pub fn take_ready(&mut self, index: usize) -> Readiness {
        self.slots.get_mut(index).map_or(Readiness::empty(), |slot| {
            std::mem::take(&mut slot.ready)
        })
    }

    /// Check structural invariants.
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.active_count() > self.limit {
            return Err(format!("{} active connections exceed limit {}", self.active_count(), self.limit));
        }

        match self.slots.first() {
            Some(slot) if slot.id.is_listener() => {},
            _ => return Err("slot 0 is not the listener".to_string()),
        }

        if self.records.len() != self.active_count() || self.positions.len() != self.active_count()
        {
            return Err(format!(
                "{} slots, {} records, {} positions",
                self.active_count(),
                self.records.len(),
                self.positions.len()
            ));
        }

        for (index, slot) in self.slots.iter().enumerate().skip(1) {
            if slot.id.is_listener() {
                return Err(format!("listener id found in client slot {index}"));
            }
            if self.positions.get(&slot.id) != Some(&index) {
                return Err(format!("connection {} in slot {index} is indexed elsewhere", slot.id));
            }
            if !self.records.contains_key(&slot.id) {
                return Err(format!("connection {} in slot {index} has no record", slot.id));
            }
            if slot.interest.is_readable() == slot.interest.is_writable() {
                return Err(format!(
                    "connection {} armed for {:?}, expected exactly one direction",
                    slot.id, slot.interest
                ));
            }
        }

        Ok(())
    }
}
