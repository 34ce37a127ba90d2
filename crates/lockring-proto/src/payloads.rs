//! Typed payloads and their byte layouts.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one [`MessageKind`] (enforced by match
//! exhaustiveness), and each kind has exactly one [`Schema`] used in both
//! directions.

use bytes::Bytes;
use lockring_crypto::{
    AkeInitMessage, AkeResponseMessage, Ciphertext, Coin, Commitment, PublicKey, SealedMessage,
    Share, WrappedKey,
    cipher::{NONCE_SIZE, TAG_SIZE},
    provider::{
        CIPHERTEXT_SIZE, COIN_SIZE, COMMITMENT_TAG_SIZE, PUBLIC_KEY_SIZE, SHARE_MESSAGE_SIZE,
    },
    ring::SHARE_SIZE,
    wrap::{MASKED_KEY_SIZE, WRAP_TAG_SIZE},
};

use crate::{
    envelope::{Envelope, MessageKind, Recipient},
    errors::{ProtocolError, Result},
    schema::{Field, Schema, array},
};

/// AKE_INIT: ephemeral encapsulation key ‖ ciphertext to the responder.
pub const AKE_INIT_SCHEMA: Schema = Schema::fixed(
    "AKE_INIT",
    &[Field::new("ephemeral_key", PUBLIC_KEY_SIZE), Field::new("ciphertext", CIPHERTEXT_SIZE)],
);

/// AKE_RESPOND: ciphertext to the ephemeral key ‖ ciphertext to the static key.
pub const AKE_RESPOND_SCHEMA: Schema = Schema::fixed(
    "AKE_RESPOND",
    &[
        Field::new("ephemeral_ciphertext", CIPHERTEXT_SIZE),
        Field::new("static_ciphertext", CIPHERTEXT_SIZE),
    ],
);

/// SHARE_BROADCAST: share ‖ commitment (KEM part, DEM part, tag) ‖ coin.
pub const SHARE_BROADCAST_SCHEMA: Schema = Schema::fixed(
    "SHARE_BROADCAST",
    &[
        Field::new("share", SHARE_SIZE),
        Field::new("kem_ciphertext", CIPHERTEXT_SIZE),
        Field::new("dem_ciphertext", SHARE_MESSAGE_SIZE),
        Field::new("tag", COMMITMENT_TAG_SIZE),
        Field::new("coin", COIN_SIZE),
    ],
);

/// WRAPPED_KEY: masked key ‖ HMAC tag.
pub const WRAPPED_KEY_SCHEMA: Schema = Schema::fixed(
    "WRAPPED_KEY",
    &[Field::new("masked_key", MASKED_KEY_SIZE), Field::new("tag", WRAP_TAG_SIZE)],
);

/// APP_MESSAGE: nonce ‖ ciphertext (variable, tag included).
pub const APP_MESSAGE_SCHEMA: Schema =
    Schema::with_tail("APP_MESSAGE", &[Field::new("nonce", NONCE_SIZE)], "ciphertext");

/// A committed share together with the coin that opens it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareBroadcast {
    /// Sender's share `x_i`
    pub share: Share,
    /// Commitment to `x_i ‖ i`
    pub commitment: Commitment,
    /// Randomness that reproduces the commitment
    pub coin: Coin,
}

/// All message payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// First AKE message
    AkeInit(AkeInitMessage),
    /// AKE response
    AkeRespond(AkeResponseMessage),
    /// Committed share
    ShareBroadcast(ShareBroadcast),
    /// Wrapped leader key
    WrappedKey(WrappedKey),
    /// Sealed application message
    AppMessage(SealedMessage),
}

impl Payload {
    /// Kind corresponding to this payload.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::AkeInit(_) => MessageKind::AkeInit,
            Self::AkeRespond(_) => MessageKind::AkeRespond,
            Self::ShareBroadcast(_) => MessageKind::ShareBroadcast,
            Self::WrappedKey(_) => MessageKind::WrappedKey,
            Self::AppMessage(_) => MessageKind::AppMessage,
        }
    }

    /// The byte layout for `kind`.
    pub const fn schema(kind: MessageKind) -> Schema {
        match kind {
            MessageKind::AkeInit => AKE_INIT_SCHEMA,
            MessageKind::AkeRespond => AKE_RESPOND_SCHEMA,
            MessageKind::ShareBroadcast => SHARE_BROADCAST_SCHEMA,
            MessageKind::WrappedKey => WRAPPED_KEY_SCHEMA,
            MessageKind::AppMessage => APP_MESSAGE_SCHEMA,
        }
    }

    /// Serialize to payload bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let schema = Self::schema(self.kind());
        match self {
            Self::AkeInit(m) => schema
                .join(&[m.ephemeral_key.as_bytes().as_slice(), m.ciphertext.as_bytes().as_slice()]),
            Self::AkeRespond(m) => schema.join(&[
                m.ephemeral_ciphertext.as_bytes().as_slice(),
                m.static_ciphertext.as_bytes().as_slice(),
            ]),
            Self::ShareBroadcast(m) => schema.join(&[
                m.share.as_bytes().as_slice(),
                m.commitment.kem_ciphertext.as_bytes().as_slice(),
                m.commitment.dem_ciphertext.as_slice(),
                m.commitment.tag.as_slice(),
                m.coin.as_bytes().as_slice(),
            ]),
            Self::WrappedKey(m) => schema.join(&[m.masked_key.as_slice(), m.tag.as_slice()]),
            Self::AppMessage(m) => schema.join(&[m.nonce.as_slice(), m.ciphertext.as_slice()]),
        }
    }

    /// Parse payload bytes of the given kind.
    pub fn decode(kind: MessageKind, bytes: &[u8]) -> Result<Self> {
        let parts = Self::schema(kind).split(bytes)?;
        let payload = match kind {
            MessageKind::AkeInit => Self::AkeInit(AkeInitMessage {
                ephemeral_key: PublicKey::from_bytes(array(parts[0], "ephemeral_key")?),
                ciphertext: Ciphertext::from_bytes(array(parts[1], "ciphertext")?),
            }),
            MessageKind::AkeRespond => Self::AkeRespond(AkeResponseMessage {
                ephemeral_ciphertext: Ciphertext::from_bytes(array(
                    parts[0],
                    "ephemeral_ciphertext",
                )?),
                static_ciphertext: Ciphertext::from_bytes(array(parts[1], "static_ciphertext")?),
            }),
            MessageKind::ShareBroadcast => Self::ShareBroadcast(ShareBroadcast {
                share: Share::from_bytes(array(parts[0], "share")?),
                commitment: Commitment {
                    kem_ciphertext: Ciphertext::from_bytes(array(parts[1], "kem_ciphertext")?),
                    dem_ciphertext: array(parts[2], "dem_ciphertext")?,
                    tag: array(parts[3], "tag")?,
                },
                coin: Coin::from_bytes(array(parts[4], "coin")?),
            }),
            MessageKind::WrappedKey => Self::WrappedKey(WrappedKey {
                masked_key: array(parts[0], "masked_key")?,
                tag: array(parts[1], "tag")?,
            }),
            MessageKind::AppMessage => {
                if parts[1].len() < TAG_SIZE {
                    return Err(ProtocolError::PayloadLength {
                        schema: APP_MESSAGE_SCHEMA.name(),
                        expected: NONCE_SIZE + TAG_SIZE,
                        actual: bytes.len(),
                    });
                }
                Self::AppMessage(SealedMessage {
                    nonce: array(parts[0], "nonce")?,
                    ciphertext: parts[1].to_vec(),
                })
            },
        };
        Ok(payload)
    }

    /// Wrap this payload in an envelope.
    pub fn to_envelope(&self, sender_index: u32, recipient: Recipient) -> Result<Envelope> {
        Ok(Envelope::new(sender_index, recipient, self.kind(), Bytes::from(self.encode()?)))
    }

    /// Decode the payload carried by `envelope`.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        Self::decode(envelope.kind, &envelope.content)
    }
}
