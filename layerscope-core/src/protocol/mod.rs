//! Bundled protocol dissectors.
//!
//! | Token  | Kind   | Offered                   |
//! |--------|--------|---------------------------|
//! | `eth`  | frame  | root, link type 1         |
//! | `ipv4` | frame  | `eth$`, ethertype 0x0800  |
//! | `udp`  | frame  | `ipv4$`, protocol 17      |
//! | `tcp`  | frame  | `ipv4$`, protocol 6       |
//! | `http` | stream | `tcp$`                    |

mod ethernet;
mod http;
mod ipv4;
mod tcp;
mod udp;

#[cfg(test)]
pub mod test_utils;

use std::fmt::Write;

use compact_str::{format_compact, CompactString};

use crate::dissector::Registry;

pub use ethernet::{ethertype, EthernetDissector, ETH_HEADER_LEN};
pub use http::HttpDissector;
pub use ipv4::{ip_proto, Ipv4Dissector, IPV4_MIN_HEADER_LEN};
pub use tcp::{tcp_flags, TcpDissector, TCP_MIN_HEADER_LEN};
pub use udp::{UdpDissector, UDP_HEADER_LEN};

/// Registry with every bundled dissector, lower layers first.
pub fn default_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(EthernetDissector)
        .register(Ipv4Dissector)
        .register(UdpDissector)
        .register(TcpDissector)
        .register_stream(HttpDissector);
    registry
}

/// Format a MAC address as colon-separated hex.
pub fn format_mac(bytes: &[u8]) -> CompactString {
    let mut out = CompactString::default();
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Format a 4-byte IPv4 address as dotted quad. Other lengths yield `?`.
pub fn format_ipv4(bytes: &[u8]) -> CompactString {
    match bytes {
        [a, b, c, d] => format_compact!("{a}.{b}.{c}.{d}"),
        _ => CompactString::new("?"),
    }
}

/// Endpoint text for stream keys, e.g. `10.0.0.1:53`.
pub(crate) fn endpoint(addr: &[u8], port: u16) -> CompactString {
    format_compact!("{}:{port}", format_ipv4(addr))
}
