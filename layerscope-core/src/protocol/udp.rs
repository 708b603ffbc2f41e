//! UDP protocol parser.

use compact_str::format_compact;

use super::{endpoint, ip_proto};
use crate::dissector::{Analysis, Dissector, FrameWorker};
use crate::intern::{FieldDef, Interner, Symbol};
use crate::layer::{AttrValue, LayerBuilder, PathPattern};
use crate::stream::StreamKey;

/// UDP header length.
pub const UDP_HEADER_LEN: usize = 8;

/// UDP dissector. Every datagram is also fed, unsequenced, into the stream
/// for its address/port 4-tuple.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpDissector;

impl Dissector for UdpDissector {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn description(&self) -> &'static str {
        "User Datagram Protocol"
    }

    fn patterns(&self) -> Vec<PathPattern> {
        vec![PathPattern::suffix(&["ipv4"])]
    }

    fn create_worker(&self, interner: &Interner) -> Box<dyn FrameWorker> {
        Box::new(UdpWorker {
            token: interner.intern("udp"),
            transport: interner.intern("transport"),
            src: interner.field("udp.src", "Source Port"),
            dst: interner.field("udp.dst", "Destination Port"),
            len: interner.field("udp.len", "Length"),
            checksum: interner.field("udp.checksum", "Checksum"),
        })
    }
}

struct UdpWorker {
    token: Symbol,
    transport: Symbol,
    src: FieldDef,
    dst: FieldDef,
    len: FieldDef,
    checksum: FieldDef,
}

impl FrameWorker for UdpWorker {
    fn analyze(&self, cx: &Analysis<'_>) -> Option<LayerBuilder> {
        if cx.attr("ipv4.proto").and_then(AttrValue::as_u64) != Some(u64::from(ip_proto::UDP)) {
            return None;
        }

        let mut layer = cx.child(&self.token);
        layer.tag(self.transport.clone());

        let src = layer.read_u16(&self.src, 0);
        let dst = layer.read_u16(&self.dst, 2);
        let len = layer.read_u16(&self.len, 4);
        layer.read_u16(&self.checksum, 6);

        match len.map(usize::from) {
            Some(len) if len >= UDP_HEADER_LEN => {
                layer.truncate(len);
                layer.set_payload(UDP_HEADER_LEN, len - UDP_HEADER_LEN);
            }
            Some(_) => {
                layer.mark_error();
                layer.set_payload_from(UDP_HEADER_LEN);
            }
            None => layer.set_payload_from(UDP_HEADER_LEN),
        }

        let (Some(src), Some(dst)) = (src, dst) else {
            return Some(layer);
        };
        layer.set_summary(format_compact!(
            "{src} → {dst} len {}",
            len.map_or(0, |l| l.saturating_sub(UDP_HEADER_LEN as u16))
        ));

        let addrs = (
            cx.attr("ipv4.src").and_then(AttrValue::as_bytes),
            cx.attr("ipv4.dst").and_then(AttrValue::as_bytes),
        );
        if let (Some(src_ip), Some(dst_ip)) = addrs {
            let key = format_compact!("udp {} → {}", endpoint(src_ip, src), endpoint(dst_ip, dst));
            layer.set_stream(StreamKey::new(key), None);
        }
        Some(layer)
    }
}
