//! Decode and encode errors for envelopes and payloads.

use thiserror::Error;

use crate::envelope::MessageKind;

/// Convenience alias for protocol results.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while turning bytes into envelopes and payloads or back.
///
/// Every variant is a decode-class failure: the offending message is dropped
/// and no session state changes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Line is not a well-formed envelope object.
    #[error("malformed envelope JSON: {0}")]
    Json(String),

    /// `content` is not valid standard base64.
    #[error("invalid base64 content: {0}")]
    Base64(String),

    /// `type` is not one of the known message kinds.
    #[error("unknown message type {0}")]
    UnknownKind(i64),

    /// A point-to-point kind arrived without a receiver.
    #[error("{kind} requires a receiver index")]
    MissingRecipient {
        /// Kind that needs a receiver
        kind: MessageKind,
    },

    /// Sender or receiver index is negative or out of range.
    #[error("invalid party index {0}")]
    InvalidIndex(i64),

    /// Payload length does not match its schema.
    #[error("payload for {schema} must be {expected} bytes, got {actual}")]
    PayloadLength {
        /// Schema name
        schema: &'static str,
        /// Required length (minimum, for schemas with a variable tail)
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// A field handed to `join` has the wrong width.
    #[error("field `{field}` must be {expected} bytes, got {actual}")]
    FieldLength {
        /// Field name
        field: &'static str,
        /// Declared width
        expected: usize,
        /// Supplied width
        actual: usize,
    },

    /// Wrong number of parts handed to `join`.
    #[error("schema {schema} has {expected} fields, got {actual}")]
    FieldCount {
        /// Schema name
        schema: &'static str,
        /// Declared field count
        expected: usize,
        /// Supplied part count
        actual: usize,
    },

    /// Encoded line exceeds the configured maximum.
    #[error("message of {size} bytes exceeds limit of {max}")]
    TooLarge {
        /// Actual size
        size: usize,
        /// Configured limit
        max: usize,
    },
}
