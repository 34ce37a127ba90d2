//! Fuzz target for Envelope::from_json
//!
//! Arbitrary text lines must decode or fail with an error, never panic. Any
//! line that decodes must re-encode to an equivalent envelope.

#![no_main]

use libfuzzer_sys::fuzz_target;
use lockring_proto::Envelope;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(envelope) = Envelope::from_json(line) else {
        return;
    };

    // Decoded content may be too large to re-encode within one line
    if let Ok(encoded) = envelope.to_line() {
        let again = Envelope::from_json(encoded.trim_end()).expect("re-encoded line must decode");
        assert_eq!(again, envelope);
    }
});
