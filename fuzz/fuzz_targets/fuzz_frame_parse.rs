//! Fuzz target for event stream line handling.
//!
//! Feeds arbitrary bytes through the line buffer in arbitrary chunks and
//! parses every line that comes out. Must never panic, and a data frame's
//! payload must always be a suffix of its line.

#![no_main]

use event_replication::stream::LineBuffer;
use event_replication::{parse_line, Frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&[u8], u8)| {
    let (bytes, chunk) = data;
    let chunk = usize::from(chunk).max(1);

    let mut buffer = LineBuffer::new();
    for piece in bytes.chunks(chunk) {
        buffer.push(piece);
        while let Some(line) = buffer.next_line() {
            assert!(!line.contains('\n'));
            if let Frame::Data(payload) = parse_line(&line) {
                assert!(line.strip_suffix('\r').unwrap_or(&line).ends_with(payload));
            }
        }
    }
    assert!(buffer.pending() <= bytes.len());
});
