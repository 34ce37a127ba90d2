//! Lockring Wire Protocol
//!
//! Messages travel as newline-delimited JSON envelopes whose `content` field
//! is the base64 of a fixed-layout binary payload.
//!
//! ```text
//! {"senderIndex":i,"receiverIndex":j,"type":k,"content":"<base64>"}
//!                                              │
//!                                              ▼
//!                              Schema::split → typed Payload
//! ```
//!
//! # Layers
//!
//! - [`Envelope`]: JSON encoding, index validation, closed [`MessageKind`] set
//! - [`Schema`]: ordered named fixed-width fields, one per payload kind, used
//!   for both encoding and decoding
//! - [`Payload`]: typed view over the crypto types in `lockring-crypto`
//!
//! # Security
//!
//! Decoding never trusts lengths: every payload must match its schema exactly
//! and lines larger than [`MAX_LINE_SIZE`] are rejected before parsing.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod envelope;
pub mod errors;
pub mod payloads;
pub mod schema;

pub use envelope::{Envelope, MAX_LINE_SIZE, MessageKind, Recipient};
pub use errors::{ProtocolError, Result};
pub use payloads::{Payload, ShareBroadcast};
pub use schema::{Field, Schema};
