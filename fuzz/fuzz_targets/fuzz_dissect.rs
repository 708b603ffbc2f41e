//! Fuzz target for the dissection chain.
//!
//! Arbitrary bytes go through the bundled dissectors, including the TCP
//! stream path and HTTP parsing. Tests:
//! - Header bounds checking in each dissector
//! - Payload ranges staying inside the parent layer

#![no_main]

use std::sync::Arc;

use layerscope_core::{default_registry, RawFrame, Session, SessionConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let session = Session::new(Arc::new(default_registry()), SessionConfig::default().with_threads(1));
    let frame = session.dissect(RawFrame::ethernet(1, 0, data.to_vec()));

    for (_, layer) in frame.layers().iter() {
        let range = layer.range();
        let payload = layer.payload();
        assert!(range.end() <= data.len());
        assert!(payload.is_empty() || range.contains(&payload));
    }
});
