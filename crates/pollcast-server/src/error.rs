//! Server error types.

use std::fmt;

use pollcast_core::RelayError;

/// Errors that can occur in the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (zero user limit, undersized buffer, etc.).
    ///
    /// These are fatal errors that prevent server startup. Fix configuration
    /// and restart.
    Config(String),

    /// Transport/network error (bind failure, poller setup, etc.).
    ///
    /// Fatal at startup (address in use, permission denied). Check error
    /// message for the address involved.
    Transport(String),

    /// Relay error (from the event loop).
    ///
    /// Wraps errors from the core relay. A wait failure ends the loop.
    Relay(RelayError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Relay(err) => write!(f, "relay error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Relay(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RelayError> for ServerError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Config(msg) => Self::Config(msg),
            other => Self::Relay(other),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::{error::Error as _, io};

    use super::*;

    #[test]
    fn relay_config_error_becomes_config() {
        let err = ServerError::from(RelayError::Config("user_limit must be at least 1".into()));
        assert!(matches!(err, ServerError::Config(_)));
        assert_eq!(err.to_string(), "configuration error: user_limit must be at least 1");
    }

    #[test]
    fn wait_failure_keeps_source() {
        let err = ServerError::from(RelayError::Wait(io::Error::other("boom")));
        assert!(matches!(err, ServerError::Relay(_)));
        assert!(err.source().is_some());
    }

    #[test]
    fn io_error_is_transport() {
        let err = ServerError::from(io::Error::from(io::ErrorKind::AddrInUse));
        assert!(matches!(err, ServerError::Transport(_)));
    }
}
