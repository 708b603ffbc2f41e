//! Fuzz target for capture import.
//!
//! Tests handling of malformed capture files including:
//! - Magic byte and compression detection
//! - Global header parsing
//! - Record headers (caplen, origlen, timestamps)

#![no_main]

use layerscope_core::CaptureReader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(reader) = CaptureReader::new(data) else {
        return;
    };

    // Bounded: a gzip bomb must not run forever
    for frame in reader.take(10_000) {
        if frame.is_err() {
            break;
        }
    }
});
