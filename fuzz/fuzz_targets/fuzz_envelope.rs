//! Fuzz target for bus envelope decoding.
//!
//! Anything can arrive on a topic. Decoding must never panic, and whatever
//! decodes must survive a re-encode unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replica_cache::envelope::Envelope;

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = Envelope::decode(data) else {
        return;
    };

    // Typed payload extraction never panics either
    let _ = envelope.payload_as::<(String, String)>();
    let _ = envelope.payload_as::<Option<String>>();
    let _ = envelope.tag();

    let bytes = envelope.encode().expect("decoded envelope must encode");
    let again = Envelope::decode(&bytes).expect("re-encoded envelope must decode");
    assert_eq!(again.op, envelope.op);
});
