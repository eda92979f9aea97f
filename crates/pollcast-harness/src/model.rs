//! Reference model of the relay.
//!
//! The model tracks only what a client can observe: whether it is admitted,
//! refused, or gone, and the bytes it should have received. Operations are
//! applied to both the model and a [`SimRelay`], the relay is run until idle,
//! and the two are compared with [`ModelRelay::check`].
//!
//! Because the relay settles between operations, every broadcast is written
//! before the next one is staged. Message payloads are kept within one read
//! so one send produces exactly one relayed message.

use arbitrary::Arbitrary;
use pollcast_core::{ConnectionId, REJECTION_MESSAGE};

use crate::{sim_network::SimNetwork, sim_relay::SimRelay};

/// Index into the list of clients created so far.
pub type ClientIndex = u8;

/// One step of a model-based test.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// A new client connects
    Connect,
    /// A client sends a message
    Send {
        /// Client, modulo the number of clients created
        client: ClientIndex,
        /// Message bytes
        payload: Vec<u8>,
    },
    /// A client sends a message and immediately shuts down its write half
    SendThenClose {
        /// Client, modulo the number of clients created
        client: ClientIndex,
        /// Message bytes
        payload: Vec<u8>,
    },
    /// A client shuts down its write half
    Close {
        /// Client, modulo the number of clients created
        client: ClientIndex,
    },
    /// A client hangs up
    HangUp {
        /// Client, modulo the number of clients created
        client: ClientIndex,
    },
    /// A client's connection is reset
    Reset {
        /// Client, modulo the number of clients created
        client: ClientIndex,
    },
}

/// Observable state of one client in the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientStatus {
    /// Admitted and still connected
    Active,
    /// Refused for capacity
    Refused,
    /// Admitted, then left
    Gone,
}

/// What the model expects a client to have seen.
#[derive(Debug, Clone)]
pub struct ModelClient {
    /// Relay-side identifier
    pub id: ConnectionId,
    /// Current status
    pub status: ClientStatus,
    /// Bytes the client should have received, in order
    pub expected: Vec<u8>,
}

/// Reference model.
#[derive(Debug, Clone)]
pub struct ModelRelay {
    limit: usize,
    max_message_len: usize,
    clients: Vec<ModelClient>,
}

impl ModelRelay {
    /// Create a model admitting `limit` clients with messages of at most
    /// `max_message_len` bytes.
    pub fn new(limit: usize, max_message_len: usize) -> Self {
        Self { limit, max_message_len, clients: Vec::new() }
    }

    /// Clients created so far.
    pub fn clients(&self) -> &[ModelClient] {
        &self.clients
    }

    /// Number of active clients.
    pub fn active_count(&self) -> usize {
        self.clients.iter().filter(|c| c.status == ClientStatus::Active).count()
    }

    /// Apply `op` to the model and the simulated network, then settle the
    /// relay.
    pub fn apply(&mut self, op: &Operation, network: &SimNetwork, sim: &mut SimRelay) {
        match op {
            Operation::Connect => {
                let id = network.connect();
                let status = if self.active_count() >= self.limit {
                    ClientStatus::Refused
                } else {
                    ClientStatus::Active
                };
                let expected =
                    if status == ClientStatus::Refused { REJECTION_MESSAGE.to_vec() } else { Vec::new() };
                self.clients.push(ModelClient { id, status, expected });
            },
            Operation::Send { client, payload } => {
                if let Some(sender) = self.active_client(*client) {
                    let payload = self.clip(payload);
                    network.send(self.clients[sender].id, &payload);
                    self.deliver(sender, &payload);
                }
            },
            Operation::SendThenClose { client, payload } => {
                if let Some(sender) = self.active_client(*client) {
                    let payload = self.clip(payload);
                    network.send(self.clients[sender].id, &payload);
                    network.shutdown(self.clients[sender].id);
                    self.deliver(sender, &payload);
                    self.clients[sender].status = ClientStatus::Gone;
                }
            },
            Operation::Close { client } => {
                if let Some(index) = self.active_client(*client) {
                    network.shutdown(self.clients[index].id);
                    self.clients[index].status = ClientStatus::Gone;
                }
            },
            Operation::HangUp { client } => {
                if let Some(index) = self.active_client(*client) {
                    network.hang_up(self.clients[index].id);
                    self.clients[index].status = ClientStatus::Gone;
                }
            },
            Operation::Reset { client } => {
                if let Some(index) = self.active_client(*client) {
                    network.reset(self.clients[index].id);
                    self.clients[index].status = ClientStatus::Gone;
                }
            },
        }

        sim.run_until_idle();
    }

    /// Compare the model against the relay and the network.
    ///
    /// Returns a description of the first mismatch.
    pub fn check(&self, network: &SimNetwork, sim: &SimRelay) -> Result<(), String> {
        if sim.active_count() != self.active_count() {
            return Err(format!(
                "relay has {} active clients, model has {}",
                sim.active_count(),
                self.active_count()
            ));
        }

        sim.relay().table().check_invariants()?;

        for client in &self.clients {
            let received = network.received_bytes(client.id);
            if received != client.expected {
                return Err(format!(
                    "client {} received {:?}, expected {:?}",
                    client.id,
                    String::from_utf8_lossy(&received),
                    String::from_utf8_lossy(&client.expected)
                ));
            }

            let closed = network.is_closed(client.id);
            let in_table = sim.relay().table().contains(client.id);
            match client.status {
                ClientStatus::Active if closed || !in_table => {
                    return Err(format!("active client {} was dropped", client.id));
                },
                ClientStatus::Refused | ClientStatus::Gone if !closed || in_table => {
                    return Err(format!("departed client {} still held by relay", client.id));
                },
                _ => {},
            }
        }

        Ok(())
    }

    fn active_client(&self, client: ClientIndex) -> Option<usize> {
        if self.clients.is_empty() {
            return None;
        }
        let index = usize::from(client) % self.clients.len();
        (self.clients[index].status == ClientStatus::Active).then_some(index)
    }

    /// Keep payloads non-empty and within a single read.
    fn clip(&self, payload: &[u8]) -> Vec<u8> {
        let mut payload = payload[..payload.len().min(self.max_message_len)].to_vec();
        if payload.is_empty() {
            payload.push(b'.');
        }
        payload
    }

    fn deliver(&mut self, sender: usize, payload: &[u8]) {
        for (index, client) in self.clients.iter_mut().enumerate() {
            if index != sender && client.status == ClientStatus::Active {
                client.expected.extend_from_slice(payload);
            }
        }
    }
}
