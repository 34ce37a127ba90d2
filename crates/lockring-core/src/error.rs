//! Error types for sessions, key distribution, and node composition.

use lockring_crypto::CryptoError;
use lockring_proto::{MessageKind, ProtocolError};
use thiserror::Error;

use crate::session::SessionState;

/// A cryptographic check that failed. Always fatal to the affected run.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationFailure {
    /// The shares did not XOR to zero.
    #[error("share closure check failed")]
    Closure,

    /// A share did not match the commitment its sender published.
    #[error("commitment mismatch for party {index}")]
    Commitment {
        /// Ring index of the offending party
        index: usize,
    },

    /// A wrapped key's HMAC did not verify.
    #[error("wrapped key tag mismatch")]
    WrappedKeyTag,
}

/// Errors returned by [`crate::GakeSession`], [`crate::KeyDistributor`], and
/// [`crate::Node`].
///
/// Only [`SessionError::Verification`] and [`SessionError::Aborted`] are
/// fatal; everything else means "this one input was dropped".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Malformed envelope or payload. Dropped with no state change.
    #[error("decode error: {0}")]
    Decode(#[from] ProtocolError),

    /// Closure, commitment, or wrapped-key check failed. The run is over.
    #[error("verification failed: {0}")]
    Verification(VerificationFailure),

    /// Message for a stage this session has not reached.
    #[error("ordering anomaly: {reason}")]
    OrderingAnomaly {
        /// What arrived too early
        reason: String,
    },

    /// Encryption or decryption requested before a group key exists.
    #[error("no group key available")]
    NoKeyAvailable,

    /// A point-to-point message came from a party that is not the expected
    /// neighbor.
    #[error("unexpected {kind} from party {sender}")]
    UnexpectedSender {
        /// Message kind
        kind: MessageKind,
        /// Claimed sender index
        sender: u32,
    },

    /// The kind is not handled by this layer.
    #[error("{kind} is not handled by {layer}")]
    UnexpectedKind {
        /// Message kind
        kind: MessageKind,
        /// Layer that rejected it
        layer: &'static str,
    },

    /// Operation is not valid in the current state.
    #[error("invalid state: cannot {operation} from {state:?}")]
    InvalidState {
        /// State at the time of the call
        state: SessionState,
        /// Rejected operation
        operation: &'static str,
    },

    /// Ring membership or node layout is unusable.
    #[error("invalid roster: {reason}")]
    InvalidRoster {
        /// What is wrong
        reason: String,
    },

    /// A primitive rejected its input (for example a malformed KEM key).
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A previous verification failure ended this run.
    #[error("session aborted")]
    Aborted,
}

impl SessionError {
    /// Whether the error ends the run.
    ///
    /// Fatal errors are never downgraded: the caller must stop driving the
    /// affected session and surface the failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Verification(_) | Self::Aborted)
    }

    pub(crate) fn ordering(reason: impl Into<String>) -> Self {
        Self::OrderingAnomaly { reason: reason.into() }
    }
}
