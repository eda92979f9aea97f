//! Fuzz target for the connection table.
//!
//! # Invariants
//!
//! - Slot 0 always holds the listener
//! - Every slot has exactly one record and position entry
//! - Removal never changes the relative order of untouched slots except the
//!   one moved from the end
//! - Inserts beyond the limit fail without side effects

#![no_main]

use std::net::{Ipv4Addr, SocketAddr};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pollcast_core::{ConnectionId, ConnectionRecord, ConnectionState, ConnectionTable};

#[derive(Debug, Clone, Arbitrary)]
enum TableOp {
    Insert { id: u8 },
    RemoveSlot { index: u8 },
    Remove { id: u8 },
    Arm { id: u8, sending: bool },
}

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    limit: u8,
    ops: Vec<TableOp>,
}

fuzz_target!(|scenario: Scenario| {
    let limit = usize::from(scenario.limit % 16) + 1;
    let mut table = ConnectionTable::new(limit);

    for op in scenario.ops.iter().take(512) {
        match *op {
            TableOp::Insert { id } => {
                let before = table.active_count();
                let peer = SocketAddr::from((Ipv4Addr::LOCALHOST, u16::from(id)));
                let result = table.insert(ConnectionId::new(usize::from(id)), ConnectionRecord::new(peer, 64));
                if result.is_err() {
                    assert_eq!(table.active_count(), before);
                }
            },
            TableOp::RemoveSlot { index } => {
                let index = usize::from(index);
                let slots = table.slots().len();
                let last = table.slots().last().map(|slot| slot.id());
                let removed = table.remove_slot(index);

                if index == 0 || index >= slots {
                    assert!(removed.is_none());
                } else if index < slots - 1 {
                    assert_eq!(table.slot(index).map(|slot| slot.id()), last);
                }
            },
            TableOp::Remove { id } => {
                let id = ConnectionId::new(usize::from(id));
                let present = table.contains(id);
                assert_eq!(table.remove(id).is_some(), present && !id.is_listener());
            },
            TableOp::Arm { id, sending } => {
                let state = if sending { ConnectionState::Sending } else { ConnectionState::Receiving };
                let _ = table.arm(ConnectionId::new(usize::from(id)), state);
            },
        }

        if let Err(violation) = table.check_invariants() {
            panic!("{op:?}: {violation}");
        }
    }
});
