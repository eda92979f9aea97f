//! Relay driven over a simulated network.

use pollcast_core::{Relay, RelayConfig, RelayError, RelayStats};

use crate::sim_network::{SimMultiplexer, SimNetwork};

/// Upper bound on cycles in [`SimRelay::run_until_idle`].
///
/// Every operation in the simulated network settles in a handful of cycles;
/// hitting this bound means the relay is spinning.
pub const MAX_IDLE_CYCLES: usize = 1_000;

/// A [`Relay`] wired to a [`SimNetwork`].
pub struct SimRelay {
    relay: Relay<SimMultiplexer>,
}

impl SimRelay {
    /// Create a relay listening on `network`.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    #[allow(clippy::expect_used)]
    pub fn new(network: &SimNetwork, config: RelayConfig) -> Self {
        let relay = Relay::new(network.multiplexer(), config)
            .expect("invariant: simulation config must be valid");
        Self { relay }
    }

    /// The relay under test.
    pub fn relay(&self) -> &Relay<SimMultiplexer> {
        &self.relay
    }

    /// Counters of the relay under test.
    pub fn stats(&self) -> RelayStats {
        self.relay.stats()
    }

    /// Number of admitted clients.
    pub fn active_count(&self) -> usize {
        self.relay.table().active_count()
    }

    /// Run exactly one wait/dispatch cycle.
    pub fn turn(&mut self) -> Result<usize, RelayError> {
        self.relay.turn()
    }

    /// Run cycles until a wait finds nothing ready.
    ///
    /// Returns the number of cycles that had work.
    ///
    /// # Panics
    ///
    /// Panics if the wait fails or the relay does not settle within
    /// [`MAX_IDLE_CYCLES`].
    #[allow(clippy::panic)]
    pub fn run_until_idle(&mut self) -> usize {
        for cycle in 0..MAX_IDLE_CYCLES {
            match self.relay.turn() {
                Ok(0) => {
                    tracing::trace!(cycles = cycle, "simulation settled");
                    return cycle;
                },
                Ok(_) => {},
                Err(e) => panic!("relay wait failed in simulation: {e}"),
            }
        }
        panic!("relay did not settle within {MAX_IDLE_CYCLES} cycles");
    }

    /// Tear down the relay, closing every client.
    pub fn release(self) -> SimMultiplexer {
        self.relay.release()
    }
}
