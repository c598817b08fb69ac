//! Fuzz target for inbound event decoding.
//!
//! Arbitrary frame payloads must decode or fail cleanly; anything that
//! decodes must re-encode to an event with the same content hash.

#![no_main]

use event_replication::Event;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(event) = Event::decode(data) else {
        return;
    };

    let _ = event.verify_hash();
    let _ = event.decode_payload::<serde_json::Value>();

    if let Ok(again) = event.encode().and_then(|encoded| Event::decode(&encoded)) {
        assert_eq!(again.event_sha, event.event_sha);
        assert_eq!(again.event_data, event.event_data);
    }
});
