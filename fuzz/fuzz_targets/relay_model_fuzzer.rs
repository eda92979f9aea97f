//! Fuzz target comparing the relay against the reference model.
//!
//! # Invariants
//!
//! - Active clients never exceed the user limit
//! - Every admitted client receives exactly the messages sent by others while
//!   it was connected
//! - Refused clients receive only the rejection notice
//! - Departed clients are closed and gone from the table

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pollcast_core::RelayConfig;
use pollcast_harness::{ModelRelay, Operation, SimNetwork, SimRelay};

#[derive(Debug, Clone, Arbitrary)]
struct Session {
    limit: u8,
    operations: Vec<Operation>,
}

fuzz_target!(|session: Session| {
    let limit = usize::from(session.limit % 8) + 1;
    let config = RelayConfig { user_limit: limit, ..RelayConfig::default() };

    let network = SimNetwork::new();
    let mut sim = SimRelay::new(&network, config);
    let mut model = ModelRelay::new(limit, config.max_message_len());

    for op in session.operations.iter().take(256) {
        model.apply(op, &network, &mut sim);
        if let Err(mismatch) = model.check(&network, &sim) {
            panic!("{op:?}: {mismatch}");
        }
        assert!(sim.active_count() <= limit);
    }
});
