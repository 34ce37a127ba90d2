//! JSON message envelope.
//!
//! Every protocol message travels as one JSON object per line:
//!
//! ```text
//! {"senderIndex":0,"receiverIndex":1,"type":1,"content":"<base64>"}
//! ```
//!
//! `receiverIndex` may be absent or `-1` for broadcasts; this implementation
//! always writes `-1`. The envelope carries no ring identifier: each ring has
//! its own transport.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Upper bound on a single encoded envelope line.
pub const MAX_LINE_SIZE: usize = 256 * 1024;

/// The closed set of message kinds.
///
/// Codes are fixed on the wire. Anything else decodes to
/// [`ProtocolError::UnknownKind`] so callers can log it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// First AKE message, initiator to its right neighbor
    AkeInit = 1,
    /// AKE response, responder back to the initiator
    AkeRespond = 2,
    /// Share, commitment, and coin, broadcast to the ring
    ShareBroadcast = 3,
    /// Leader key wrapped under the cluster key, broadcast in a cluster
    WrappedKey = 4,
    /// Application data sealed under the cluster key
    AppMessage = 5,
}

impl MessageKind {
    /// Every kind, in code order.
    pub const ALL: [Self; 5] =
        [Self::AkeInit, Self::AkeRespond, Self::ShareBroadcast, Self::WrappedKey, Self::AppMessage];

    /// Parse a wire code.
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::AkeInit),
            2 => Some(Self::AkeRespond),
            3 => Some(Self::ShareBroadcast),
            4 => Some(Self::WrappedKey),
            5 => Some(Self::AppMessage),
            _ => None,
        }
    }

    /// Wire code.
    pub const fn code(self) -> i64 {
        self as i64
    }

    /// Point-to-point kinds must name a receiver.
    pub const fn requires_recipient(self) -> bool {
        matches!(self, Self::AkeInit | Self::AkeRespond)
    }

    /// Wire name, for logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::AkeInit => "AKE_INIT",
            Self::AkeRespond => "AKE_RESPOND",
            Self::ShareBroadcast => "SHARE_BROADCAST",
            Self::WrappedKey => "WRAPPED_KEY",
            Self::AppMessage => "APP_MESSAGE",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Who a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recipient {
    /// Every other party in the ring
    Broadcast,
    /// A single ring index
    Party(u32),
}

impl Recipient {
    /// Whether a party at `index` should process the message.
    pub fn includes(self, index: u32) -> bool {
        match self {
            Self::Broadcast => true,
            Self::Party(target) => target == index,
        }
    }
}

/// A decoded envelope. The content is raw payload bytes; see
/// [`crate::Payload`] for the typed view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Ring index of the sender
    pub sender_index: u32,
    /// Addressee
    pub recipient: Recipient,
    /// Message kind
    pub kind: MessageKind,
    /// Payload bytes
    pub content: Bytes,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    sender_index: i64,
    #[serde(default)]
    receiver_index: Option<i64>,
    #[serde(rename = "type")]
    kind: i64,
    content: String,
}

impl Envelope {
    /// Build an envelope.
    pub fn new(
        sender_index: u32,
        recipient: Recipient,
        kind: MessageKind,
        content: impl Into<Bytes>,
    ) -> Self {
        Self { sender_index, recipient, kind, content: content.into() }
    }

    /// Encode as a single JSON object (no trailing newline).
    pub fn to_json(&self) -> Result<String> {
        let wire = WireEnvelope {
            sender_index: i64::from(self.sender_index),
            receiver_index: Some(match self.recipient {
                Recipient::Broadcast => -1,
                Recipient::Party(index) => i64::from(index),
            }),
            kind: self.kind.code(),
            content: STANDARD.encode(&self.content),
        };
        serde_json::to_string(&wire).map_err(|e| ProtocolError::Json(e.to_string()))
    }

    /// Encode as a newline-terminated line, enforcing [`MAX_LINE_SIZE`].
    pub fn to_line(&self) -> Result<String> {
        let mut line = self.to_json()?;
        line.push('\n');
        if line.len() > MAX_LINE_SIZE {
            return Err(ProtocolError::TooLarge { size: line.len(), max: MAX_LINE_SIZE });
        }
        Ok(line)
    }

    /// Decode one JSON envelope. Surrounding whitespace (including the line
    /// terminator) is ignored.
    ///
    /// # Errors
    ///
    /// - `TooLarge`: input longer than [`MAX_LINE_SIZE`]
    /// - `Json`: not an envelope object
    /// - `InvalidIndex`: negative sender, or receiver below -1, or out of `u32`
    /// - `UnknownKind`: `type` is not a known code
    /// - `MissingRecipient`: AKE kind without a receiver
    /// - `Base64`: content is not standard base64
    pub fn from_json(input: &str) -> Result<Self> {
        if input.len() > MAX_LINE_SIZE {
            return Err(ProtocolError::TooLarge { size: input.len(), max: MAX_LINE_SIZE });
        }

        let wire: WireEnvelope =
            serde_json::from_str(input.trim()).map_err(|e| ProtocolError::Json(e.to_string()))?;

        let sender_index = u32::try_from(wire.sender_index)
            .map_err(|_| ProtocolError::InvalidIndex(wire.sender_index))?;

        let recipient = match wire.receiver_index {
            None | Some(-1) => Recipient::Broadcast,
            Some(index) => Recipient::Party(
                u32::try_from(index).map_err(|_| ProtocolError::InvalidIndex(index))?,
            ),
        };

        let kind = MessageKind::from_code(wire.kind).ok_or(ProtocolError::UnknownKind(wire.kind))?;
        if kind.requires_recipient() && recipient == Recipient::Broadcast {
            return Err(ProtocolError::MissingRecipient { kind });
        }

        let content =
            STANDARD.decode(wire.content).map_err(|e| ProtocolError::Base64(e.to_string()))?;

        Ok(Self { sender_index, recipient, kind, content: Bytes::from(content) })
    }
}
