//! Envelope shape and decode robustness.
//!
//! The JSON shape is pinned with inline snapshots; decoding is exercised with
//! arbitrary input to make sure it only ever returns errors, never panics.

use lockring_proto::{Envelope, MessageKind, Payload, ProtocolError, Recipient};
use proptest::prelude::*;

#[test]
fn point_to_point_envelope_shape() {
    let envelope = Envelope::new(1, Recipient::Party(2), MessageKind::AkeInit, vec![1, 2, 3]);
    insta::assert_snapshot!(
        envelope.to_json().unwrap(),
        @r#"{"senderIndex":1,"receiverIndex":2,"type":1,"content":"AQID"}"#
    );
}

#[test]
fn broadcast_envelope_shape() {
    let envelope = Envelope::new(0, Recipient::Broadcast, MessageKind::WrappedKey, vec![0xff]);
    insta::assert_snapshot!(
        envelope.to_json().unwrap(),
        @r#"{"senderIndex":0,"receiverIndex":-1,"type":4,"content":"/w=="}"#
    );
}

fn kind_strategy() -> impl Strategy<Value = MessageKind> {
    prop::sample::select(MessageKind::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn arbitrary_text_never_panics(input in ".{0,512}") {
        let _ = Envelope::from_json(&input);
    }

    #[test]
    fn envelope_json_preserves_fields(
        sender in 0u32..64,
        receiver in prop::option::of(0u32..64),
        kind in kind_strategy(),
        content in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let recipient = match receiver {
            Some(index) => Recipient::Party(index),
            None if kind.requires_recipient() => Recipient::Party(0),
            None => Recipient::Broadcast,
        };
        let envelope = Envelope::new(sender, recipient, kind, content);
        let decoded = Envelope::from_json(&envelope.to_line().unwrap()).unwrap();

        prop_assert_eq!(decoded, envelope);
    }

    #[test]
    fn arbitrary_payload_bytes_decode_or_fail_cleanly(
        kind in kind_strategy(),
        bytes in prop::collection::vec(any::<u8>(), 0..2400),
    ) {
        match Payload::decode(kind, &bytes) {
            Ok(payload) => {
                prop_assert_eq!(payload.kind(), kind);
                prop_assert_eq!(payload.encode().unwrap(), bytes);
            },
            Err(ProtocolError::PayloadLength { .. }) => {},
            Err(other) => prop_assert!(false, "unexpected error {other:?}"),
        }
    }
}
