//! TCP protocol parser.

use compact_str::{format_compact, CompactString};

use super::{endpoint, ip_proto};
use crate::dissector::{Analysis, Dissector, FrameWorker};
use crate::intern::{FieldDef, Interner, Symbol};
use crate::layer::{AttrValue, LayerBuilder, PathPattern};
use crate::stream::StreamKey;

/// Minimum header length (data offset = 5).
pub const TCP_MIN_HEADER_LEN: usize = 20;

/// TCP flag bits (byte 13 of the header).
pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
}

const FLAG_NAMES: [(u8, &str, &str, &str); 6] = [
    (tcp_flags::FIN, "tcp.flags.fin", "FIN", "F"),
    (tcp_flags::SYN, "tcp.flags.syn", "SYN", "S"),
    (tcp_flags::RST, "tcp.flags.rst", "RST", "R"),
    (tcp_flags::PSH, "tcp.flags.psh", "PSH", "P"),
    (tcp_flags::ACK, "tcp.flags.ack", "ACK", "A"),
    (tcp_flags::URG, "tcp.flags.urg", "URG", "U"),
];

/// TCP dissector. Each direction of a connection is its own sequenced
/// stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDissector;

impl Dissector for TcpDissector {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn description(&self) -> &'static str {
        "Transmission Control Protocol"
    }

    fn patterns(&self) -> Vec<PathPattern> {
        vec![PathPattern::suffix(&["ipv4"])]
    }

    fn create_worker(&self, interner: &Interner) -> Box<dyn FrameWorker> {
        let flag_bits = FLAG_NAMES.map(|(bit, id, name, _)| (bit, interner.field(id, name)));
        Box::new(TcpWorker {
            token: interner.intern("tcp"),
            transport: interner.intern("transport"),
            src: interner.field("tcp.src", "Source Port"),
            dst: interner.field("tcp.dst", "Destination Port"),
            seq: interner.field("tcp.seq", "Sequence Number"),
            ack: interner.field("tcp.ack", "Acknowledgment Number"),
            offset: interner.field("tcp.offset", "Data Offset"),
            flags: interner.field("tcp.flags", "Flags"),
            flag_bits,
            window: interner.field("tcp.window", "Window"),
            checksum: interner.field("tcp.checksum", "Checksum"),
            urgent: interner.field("tcp.urgent", "Urgent Pointer"),
        })
    }
}

struct TcpWorker {
    token: Symbol,
    transport: Symbol,
    src: FieldDef,
    dst: FieldDef,
    seq: FieldDef,
    ack: FieldDef,
    offset: FieldDef,
    flags: FieldDef,
    flag_bits: [(u8, FieldDef); 6],
    window: FieldDef,
    checksum: FieldDef,
    urgent: FieldDef,
}

impl FrameWorker for TcpWorker {
    fn analyze(&self, cx: &Analysis<'_>) -> Option<LayerBuilder> {
        if cx.attr("ipv4.proto").and_then(AttrValue::as_u64) != Some(u64::from(ip_proto::TCP)) {
            return None;
        }

        let mut layer = cx.child(&self.token);
        layer.tag(self.transport.clone());

        let src = layer.read_u16(&self.src, 0);
        let dst = layer.read_u16(&self.dst, 2);
        let seq = layer.read_u32(&self.seq, 4);
        layer.read_u32(&self.ack, 8);

        let header_len = match layer.bytes().get(12) {
            Some(&b) => {
                let offset = b >> 4;
                layer.attr_at(&self.offset, offset, 12, 1);
                usize::from(offset) * 4
            }
            None => {
                layer.read_u8(&self.offset, 12);
                TCP_MIN_HEADER_LEN
            }
        };
        if header_len < TCP_MIN_HEADER_LEN {
            layer.mark_error();
        }

        let flags = layer.read_u8(&self.flags, 13);
        if let Some(flags) = flags {
            for (bit, field) in &self.flag_bits {
                layer.child_attr("tcp.flags", field, flags & bit != 0);
            }
        }
        layer.read_u16(&self.window, 14);
        layer.read_u16(&self.checksum, 16);
        layer.read_u16(&self.urgent, 18);
        layer.set_payload_from(header_len.max(TCP_MIN_HEADER_LEN));

        let (Some(src), Some(dst)) = (src, dst) else {
            return Some(layer);
        };
        let payload_len = layer.len().saturating_sub(header_len);
        layer.set_summary(format_compact!(
            "{src} → {dst} [{}] len {payload_len}",
            flags.map(flag_string).unwrap_or_default()
        ));

        let addrs = (
            cx.attr("ipv4.src").and_then(AttrValue::as_bytes),
            cx.attr("ipv4.dst").and_then(AttrValue::as_bytes),
        );
        if let (Some(src_ip), Some(dst_ip), Some(seq)) = (addrs.0, addrs.1, seq) {
            // Data in a SYN segment starts one past its sequence number.
            let first = match flags {
                Some(f) if f & tcp_flags::SYN != 0 => seq.wrapping_add(1),
                _ => seq,
            };
            let key = format_compact!("tcp {} → {}", endpoint(src_ip, src), endpoint(dst_ip, dst));
            layer.set_stream(StreamKey::new(key), Some(first));
        }
        Some(layer)
    }
}

/// Compact flag text, e.g. `SA` for SYN+ACK.
fn flag_string(flags: u8) -> CompactString {
    FLAG_NAMES
        .iter()
        .filter(|(bit, ..)| flags & bit != 0)
        .map(|(.., short)| *short)
        .collect()
}
