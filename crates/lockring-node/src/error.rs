//! Node runtime error types.

use std::fmt;

use lockring_core::SessionError;

/// Errors from the node runtime, the relay, and the CLI.
#[derive(Debug)]
pub enum NodeError {
    /// Unusable configuration (unreadable or malformed key or roster file,
    /// unknown party name, bad address).
    ///
    /// Fatal at startup. Fix the configuration and restart.
    Config(String),

    /// Network or stream I/O failed, or a peer sent an oversized line.
    ///
    /// Fatal for the affected connection.
    Transport(String),

    /// A session, distributor, or cipher error surfaced to the caller.
    ///
    /// See [`SessionError::is_fatal`] for whether the run is over.
    Session(SessionError),

    /// The node's background tasks have stopped.
    Closed,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Session(err) => write!(f, "session error: {err}"),
            Self::Closed => write!(f, "node stopped"),
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Session(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SessionError> for NodeError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
