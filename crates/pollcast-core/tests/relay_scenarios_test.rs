//! Relay behaviour over the simulated network.
//!
//! Each test drives the relay cycle by cycle and ends with oracle checks on
//! what every client received and on the connection table.

use std::io;

use pollcast_core::{ConnectionId, Interest, REJECTION_MESSAGE, RelayConfig, RelayError};
use pollcast_harness::{SimNetwork, SimRelay};

fn relay(limit: usize) -> (SimNetwork, SimRelay) {
    let network = SimNetwork::new();
    let sim = SimRelay::new(&network, RelayConfig { user_limit: limit, ..RelayConfig::default() });
    (network, sim)
}

/// Connect `count` clients and settle.
fn join(network: &SimNetwork, sim: &mut SimRelay, count: usize) -> Vec<ConnectionId> {
    let ids = (0..count).map(|_| network.connect()).collect();
    sim.run_until_idle();
    ids
}

/// Oracle: the table is consistent and holds `expected` clients.
fn verify_table(sim: &SimRelay, expected: usize, context: &str) {
    let table = sim.relay().table();
    assert_eq!(table.active_count(), expected, "{context}: active count");
    assert_eq!(table.check_invariants(), Ok(()), "{context}: table invariants");
}

#[test]
fn message_reaches_everyone_but_sender() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 3);

    network.send(ids[0], b"hi");
    sim.run_until_idle();

    assert_eq!(network.received_bytes(ids[1]), b"hi");
    assert_eq!(network.received_bytes(ids[2]), b"hi");
    assert!(network.received(ids[0]).is_empty());

    let stats = sim.stats();
    assert_eq!(stats.messages, 1);
    assert_eq!(stats.deliveries, 2);
    verify_table(&sim, 3, "after broadcast");
}

#[test]
fn recipients_return_to_reading_after_delivery() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 2);

    network.send(ids[0], b"ping");
    sim.run_until_idle();

    let table = sim.relay().table();
    for id in &ids {
        assert_eq!(table.interest(*id), Some(Interest::RECEIVING));
        assert!(table.record(*id).is_some_and(|r| r.pending().is_none()));
    }
}

#[test]
fn lone_sender_reaches_nobody() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 1);

    network.send(ids[0], b"anyone?");
    sim.run_until_idle();

    assert!(network.received(ids[0]).is_empty());
    assert_eq!(sim.stats().messages, 1);
    assert_eq!(sim.stats().deliveries, 0);
}

#[test]
fn sixth_client_is_refused() {
    let (network, mut sim) = relay(5);
    let admitted = join(&network, &mut sim, 5);

    let late = network.connect();
    sim.run_until_idle();

    assert_eq!(network.received_bytes(late), REJECTION_MESSAGE);
    assert_eq!(network.received(late).len(), 1, "rejection is a single write");
    assert!(network.is_closed(late));
    assert!(!sim.relay().table().contains(late));
    for id in admitted {
        assert!(network.received(id).is_empty());
        assert!(!network.is_closed(id));
    }

    assert_eq!(sim.stats().rejected, 1);
    verify_table(&sim, 5, "after rejection");
}

#[test]
fn simultaneous_arrivals_beyond_limit_are_refused() {
    let (network, mut sim) = relay(2);
    let ids = join(&network, &mut sim, 4);

    assert_eq!(sim.stats().accepted, 2);
    assert_eq!(sim.stats().rejected, 2);
    assert!(!network.is_closed(ids[0]));
    assert!(!network.is_closed(ids[1]));
    assert_eq!(network.received_bytes(ids[2]), REJECTION_MESSAGE);
    assert_eq!(network.received_bytes(ids[3]), REJECTION_MESSAGE);
    assert_eq!(network.backlog_len(), 0);
}

#[test]
fn silent_close_frees_one_slot_without_broadcast() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 3);

    network.shutdown(ids[1]);
    sim.run_until_idle();

    assert!(network.is_closed(ids[1]));
    assert!(network.received(ids[0]).is_empty());
    assert!(network.received(ids[2]).is_empty());

    let stats = sim.stats();
    assert_eq!(stats.departed, 1);
    assert_eq!(stats.messages, 0);
    verify_table(&sim, 2, "after close");
}

#[test]
fn freed_slot_admits_next_client() {
    let (network, mut sim) = relay(2);
    let ids = join(&network, &mut sim, 2);

    let refused = network.connect();
    sim.run_until_idle();
    assert!(network.is_closed(refused));

    network.shutdown(ids[1]);
    sim.run_until_idle();

    let replacement = network.connect();
    sim.run_until_idle();

    assert!(sim.relay().table().contains(replacement));
    assert!(!network.is_closed(replacement));
    assert_eq!(sim.relay().table().slots().len(), 3);
    verify_table(&sim, 2, "after reuse");
}

#[test]
fn slot_swapped_in_by_removal_is_dispatched_same_cycle() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 3);

    // First slot leaves while the last slot has data; the removal moves the
    // last slot into the first position.
    network.hang_up(ids[0]);
    network.send(ids[2], b"x");
    sim.turn().unwrap();

    let stats = sim.stats();
    assert_eq!(stats.departed, 1);
    assert_eq!(stats.messages, 1, "swapped-in slot must be read in the same cycle");

    let slots = sim.relay().table().slots();
    assert_eq!(slots.len(), 3);
    assert_eq!(slots[1].id(), ids[2]);
    assert_eq!(slots[2].id(), ids[1]);

    sim.run_until_idle();
    assert_eq!(network.received_bytes(ids[1]), b"x");
    verify_table(&sim, 2, "after swap");
}

#[test]
fn unsent_payload_is_replaced_by_newer_message() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 3);

    network.send(ids[0], b"one");
    network.send(ids[1], b"two");
    sim.run_until_idle();

    // Both reads happen in one cycle; the third client only sees the later one.
    assert_eq!(network.received_bytes(ids[0]), b"two");
    assert_eq!(network.received_bytes(ids[1]), b"one");
    assert_eq!(network.received_bytes(ids[2]), b"two");
    assert_eq!(sim.stats().overwritten, 1);
    assert_eq!(sim.stats().messages, 2);
}

#[test]
fn long_message_is_relayed_in_read_sized_pieces() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 2);
    let message: Vec<u8> = (0..100u8).map(|i| b'a' + i % 26).collect();

    // Sender sits after the recipient, so each piece is written before the
    // next one is staged.
    network.send(ids[1], &message);
    sim.run_until_idle();

    let received = network.received(ids[0]);
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].len(), 63);
    assert_eq!(received[1].len(), 37);
    assert_eq!(network.received_bytes(ids[0]), message);
    assert_eq!(sim.stats().messages, 2);
}

#[test]
fn long_message_piece_lost_when_sender_precedes_recipient() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 2);
    let message = vec![b'z'; 100];

    network.send(ids[0], &message);
    sim.run_until_idle();

    let received = network.received(ids[1]);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].len(), 37);
    assert_eq!(sim.stats().overwritten, 1);
}

#[test]
fn custom_buffer_size_limits_read_length() {
    let network = SimNetwork::new();
    let config = RelayConfig { user_limit: 5, buffer_size: 8 };
    let mut sim = SimRelay::new(&network, config);
    let ids = join(&network, &mut sim, 2);

    network.send(ids[1], b"abcdefghij");
    sim.run_until_idle();

    let received = network.received(ids[0]);
    assert_eq!(&received[0][..], b"abcdefg");
    assert_eq!(&received[1][..], b"hij");
}

#[test]
fn short_write_is_not_retried() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 2);
    network.limit_writes(ids[1], 2);

    network.send(ids[0], b"hello");
    sim.run_until_idle();

    assert_eq!(network.received_bytes(ids[1]), b"he");
    assert_eq!(sim.stats().short_writes, 1);

    let table = sim.relay().table();
    assert_eq!(table.interest(ids[1]), Some(Interest::RECEIVING));
    assert!(table.record(ids[1]).is_some_and(|r| r.pending().is_none()));
}

#[test]
fn blocked_write_keeps_payload_staged() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 2);
    network.stall_writes(ids[1], true);

    network.send(ids[0], b"wait for it");
    sim.run_until_idle();

    assert!(network.received(ids[1]).is_empty());
    let table = sim.relay().table();
    assert_eq!(table.interest(ids[1]), Some(Interest::SENDING));
    assert_eq!(
        table.record(ids[1]).and_then(|r| r.pending().cloned()).as_deref(),
        Some(&b"wait for it"[..])
    );

    network.stall_writes(ids[1], false);
    sim.run_until_idle();

    assert_eq!(network.received_bytes(ids[1]), b"wait for it");
    assert_eq!(sim.relay().table().interest(ids[1]), Some(Interest::RECEIVING));
}

#[test]
fn socket_error_leaves_connection_alone() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 2);

    network.raise_socket_error(ids[0], io::ErrorKind::ConnectionRefused);
    sim.run_until_idle();

    assert!(sim.relay().table().contains(ids[0]));
    assert!(!network.is_closed(ids[0]));
    assert_eq!(sim.relay().table().interest(ids[0]), Some(Interest::RECEIVING));
    assert_eq!(sim.stats().departed, 0);
    verify_table(&sim, 2, "after socket error");
}

#[test]
fn failed_error_query_is_survivable() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 1);

    network.fail_error_queries(true);
    network.raise_socket_error(ids[0], io::ErrorKind::ConnectionRefused);
    for _ in 0..3 {
        assert_eq!(sim.turn().unwrap(), 1);
    }
    assert!(sim.relay().table().contains(ids[0]));

    network.fail_error_queries(false);
    sim.run_until_idle();
    verify_table(&sim, 1, "after error query recovers");
}

#[test]
fn accept_failure_is_counted_and_loop_continues() {
    let (network, mut sim) = relay(5);

    network.fail_next_accept(io::ErrorKind::ConnectionAborted);
    sim.run_until_idle();
    assert_eq!(sim.stats().accept_failures, 1);
    verify_table(&sim, 0, "after accept failure");

    let id = network.connect();
    sim.run_until_idle();
    assert!(sim.relay().table().contains(id));
}

#[test]
fn wait_failure_is_fatal() {
    let (network, mut sim) = relay(5);

    network.fail_next_wait(io::ErrorKind::Other);
    let err = sim.turn().unwrap_err();

    assert!(matches!(err, RelayError::Wait(_)));
    assert!(err.is_fatal());
    assert_eq!(sim.stats().cycles, 0);
}

#[test]
fn hangup_removes_client() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 2);

    network.hang_up(ids[1]);
    sim.run_until_idle();

    assert!(network.is_closed(ids[1]));
    assert!(!sim.relay().table().contains(ids[1]));
    assert_eq!(sim.stats().departed, 1);
    verify_table(&sim, 1, "after hangup");
}

#[test]
fn hangup_while_sending_removes_client() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 2);
    network.stall_writes(ids[1], true);

    network.send(ids[0], b"never arrives");
    sim.run_until_idle();
    network.hang_up(ids[1]);
    sim.run_until_idle();

    assert!(network.is_closed(ids[1]));
    assert!(network.received(ids[1]).is_empty());
    verify_table(&sim, 1, "after hangup while sending");
}

#[test]
fn reset_removes_client() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 2);

    network.reset(ids[0]);
    sim.run_until_idle();

    assert!(network.is_closed(ids[0]));
    assert!(network.received(ids[1]).is_empty());
    verify_table(&sim, 1, "after reset");
}

#[test]
fn peer_address_is_recorded() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 1);

    let record = sim.relay().table().record(ids[0]).unwrap();
    assert_eq!(Some(record.peer()), network.peer_addr(ids[0]));
}

#[test]
fn release_closes_every_client() {
    let (network, mut sim) = relay(5);
    let ids = join(&network, &mut sim, 3);

    let _mux = sim.release();

    for id in ids {
        assert!(network.is_closed(id));
    }
}
