//! Fuzz target for Payload::decode
//!
//! Every kind is tried against the same bytes. Wrong lengths must be
//! rejected by the schema; anything accepted must encode back to the exact
//! input, since every layout is fixed-width or a single trailing field.

#![no_main]

use libfuzzer_sys::fuzz_target;
use lockring_proto::{MessageKind, Payload};

fuzz_target!(|data: &[u8]| {
    for kind in MessageKind::ALL {
        if let Ok(payload) = Payload::decode(kind, data) {
            assert_eq!(payload.kind(), kind);
            let encoded = payload.encode().expect("decoded payload must encode");
            assert_eq!(encoded, data, "{kind} layout is not canonical");
        }
    }
});
