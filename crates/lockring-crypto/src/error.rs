//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors from key exchange, commitment, and wrapping primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The KEM rejected its input (malformed key or ciphertext bytes).
    #[error("KEM operation failed: {operation}: {reason}")]
    Kem {
        /// Which KEM operation failed
        operation: &'static str,
        /// Reason reported by the KEM implementation
        reason: &'static str,
    },

    /// Byte slice had the wrong length for the requested type.
    #[error("invalid {what} length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Name of the value being parsed
        what: &'static str,
        /// Required length in bytes
        expected: usize,
        /// Length actually supplied
        actual: usize,
    },

    /// Party identifier was empty or longer than the fixed width.
    #[error("invalid party id {name:?}: must be 1..={max} bytes")]
    InvalidPartyId {
        /// The rejected name
        name: String,
        /// Maximum permitted length
        max: usize,
    },

    /// Wrapped key HMAC did not verify.
    #[error("wrapped key authentication failed")]
    WrappedKeyAuthentication,

    /// AEAD encryption or decryption failed.
    #[error("AEAD failure: {reason}")]
    Aead {
        /// What failed
        reason: String,
    },
}

impl CryptoError {
    pub(crate) fn kem(operation: &'static str) -> impl FnOnce(&'static str) -> Self {
        move |reason| Self::Kem { operation, reason }
    }
}
