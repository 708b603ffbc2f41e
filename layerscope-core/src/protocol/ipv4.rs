//! IPv4 protocol parser.

use compact_str::format_compact;
use etherparse::Ipv4HeaderSlice;

use super::{ethertype, format_ipv4};
use crate::dissector::{Analysis, Dissector, FrameWorker};
use crate::intern::{FieldDef, Interner, Symbol};
use crate::layer::{AttrValue, LayerBuilder, PathPattern};

/// Minimum header length (IHL = 5).
pub const IPV4_MIN_HEADER_LEN: usize = 20;

/// IP protocol numbers the bundled dissectors follow.
pub mod ip_proto {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

/// IPv4 dissector, offered Ethernet layers carrying ethertype 0x0800.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ipv4Dissector;

impl Dissector for Ipv4Dissector {
    fn name(&self) -> &'static str {
        "ipv4"
    }

    fn description(&self) -> &'static str {
        "Internet Protocol version 4"
    }

    fn patterns(&self) -> Vec<PathPattern> {
        vec![PathPattern::suffix(&["eth"])]
    }

    fn create_worker(&self, interner: &Interner) -> Box<dyn FrameWorker> {
        Box::new(Ipv4Worker {
            token: interner.intern("ipv4"),
            network: interner.intern("network"),
            version: interner.field("ipv4.version", "Version"),
            ihl: interner.field("ipv4.ihl", "Header Length"),
            len: interner.field("ipv4.len", "Total Length"),
            id: interner.field("ipv4.id", "Identification"),
            ttl: interner.field("ipv4.ttl", "Time to Live"),
            proto: interner.field("ipv4.proto", "Protocol"),
            checksum: interner.field("ipv4.checksum", "Header Checksum"),
            checksum_valid: interner.field("ipv4.checksum.valid", "Checksum Valid"),
            src: interner.field("ipv4.src", "Source Address"),
            dst: interner.field("ipv4.dst", "Destination Address"),
        })
    }
}

struct Ipv4Worker {
    token: Symbol,
    network: Symbol,
    version: FieldDef,
    ihl: FieldDef,
    len: FieldDef,
    id: FieldDef,
    ttl: FieldDef,
    proto: FieldDef,
    checksum: FieldDef,
    checksum_valid: FieldDef,
    src: FieldDef,
    dst: FieldDef,
}

impl FrameWorker for Ipv4Worker {
    fn analyze(&self, cx: &Analysis<'_>) -> Option<LayerBuilder> {
        if cx.attr("eth.type").and_then(AttrValue::as_u64) != Some(u64::from(ethertype::IPV4)) {
            return None;
        }

        let mut layer = cx.child(&self.token);
        layer.tag(self.network.clone());

        let Some(&first) = layer.bytes().first() else {
            layer.read_u8(&self.version, 0);
            return Some(layer);
        };
        let version = first >> 4;
        let ihl = first & 0x0f;
        layer.attr_at(&self.version, version, 0, 1);
        layer.attr_at(&self.ihl, ihl, 0, 1);
        let header_len = usize::from(ihl) * 4;
        if version != 4 || header_len < IPV4_MIN_HEADER_LEN {
            layer.mark_error();
        }

        let total_len = layer.read_u16(&self.len, 2);
        layer.read_u16(&self.id, 4);
        layer.read_u8(&self.ttl, 8);
        let proto = layer.read_u8(&self.proto, 9);
        layer.read_u16(&self.checksum, 10);
        if let Some(valid) = checksum_valid(layer.bytes()) {
            layer.child_attr("ipv4.checksum", &self.checksum_valid, valid);
        }
        let src = layer.read_bytes(&self.src, 12, 4);
        let dst = layer.read_bytes(&self.dst, 16, 4);

        match total_len.map(usize::from) {
            Some(total) if total >= header_len => {
                // Drops link-layer padding; a snaplen cut flags the layer.
                layer.truncate(total);
                layer.set_payload(header_len, total - header_len);
            }
            Some(_) => {
                layer.mark_error();
                layer.set_payload_from(header_len);
            }
            None => layer.set_payload_from(header_len),
        }

        if let (Some(src), Some(dst)) = (src, dst) {
            let proto = proto.map_or_else(|| "?".into(), |p| p.to_string());
            layer.set_summary(format_compact!(
                "{} → {} proto {proto}",
                format_ipv4(&src),
                format_ipv4(&dst)
            ));
        }
        Some(layer)
    }
}

/// Verify the header checksum. `None` when the header is incomplete.
fn checksum_valid(bytes: &[u8]) -> Option<bool> {
    let slice = Ipv4HeaderSlice::from_slice(bytes).ok()?;
    Some(slice.to_header().calc_header_checksum() == slice.header_checksum())
}
