//! Fuzz target for filter compilation.
//!
//! Any input must either compile or return a `FilterError`; compiled
//! predicates must evaluate without panicking.

#![no_main]

use layerscope_core::{compile, AliasTable, LayerTree};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let mut aliases = AliasTable::new();
    aliases.insert("sport", "udp.src").insert("ip", "ipv4");

    if let Ok(predicate) = compile(text, &aliases) {
        let _ = predicate.matches_tree(&LayerTree::new(64));
    }
});
