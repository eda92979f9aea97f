//! Error types for the relay core.
//!
//! Per-connection failures (peer close, reset, would-block) are handled inside
//! the event loop and never surface as errors. What remains is either a
//! configuration mistake, a broken table invariant, or the multiplexer wait
//! itself failing, which ends the loop.

use std::io;

use thiserror::Error;

use crate::connection::ConnectionId;

/// Errors returned by the relay core.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The readiness wait failed. The loop cannot make progress.
    #[error("readiness wait failed: {0}")]
    Wait(#[source] io::Error),

    /// Admission attempted while every slot is in use.
    #[error("connection table full ({limit} users)")]
    TableFull {
        /// Configured user limit
        limit: usize,
    },

    /// A connection identifier was inserted twice.
    #[error("connection {0} already present")]
    DuplicateConnection(ConnectionId),

    /// A connection identifier was not found in the table.
    #[error("connection {0} not found")]
    UnknownConnection(ConnectionId),

    /// Configuration rejected by [`RelayConfig::validate`].
    ///
    /// [`RelayConfig::validate`]: crate::relay::RelayConfig::validate
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RelayError {
    /// Returns true if the event loop must stop.
    ///
    /// Only a failed wait is fatal. Table errors are reported to the caller of
    /// the table API and never escape a dispatch cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Wait(_) | Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_wait_and_config_errors_are_fatal() {
        assert!(RelayError::Wait(io::Error::other("epoll gone")).is_fatal());
        assert!(RelayError::Config("user_limit must be positive".to_string()).is_fatal());

        assert!(!RelayError::TableFull { limit: 5 }.is_fatal());
        assert!(!RelayError::DuplicateConnection(ConnectionId::new(3)).is_fatal());
        assert!(!RelayError::UnknownConnection(ConnectionId::new(3)).is_fatal());
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            RelayError::TableFull { limit: 5 }.to_string(),
            "connection table full (5 users)"
        );
        assert_eq!(
            RelayError::UnknownConnection(ConnectionId::new(9)).to_string(),
            "connection #9 not found"
        );
    }
}
