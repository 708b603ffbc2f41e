//! Ethernet II protocol parser.

use compact_str::format_compact;

use super::format_mac;
use crate::dissector::{Analysis, Dissector, FrameWorker};
use crate::frame::LINKTYPE_ETHERNET;
use crate::intern::{FieldDef, Interner, Symbol};
use crate::layer::{LayerBuilder, PathPattern};

/// Ethernet II header length (dst + src + ethertype).
pub const ETH_HEADER_LEN: usize = 14;

/// Well-known EtherType values.
pub mod ethertype {
    pub const IPV4: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
    pub const IPV6: u16 = 0x86DD;
}

/// Ethernet II dissector, offered the root layer of Ethernet frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct EthernetDissector;

impl Dissector for EthernetDissector {
    fn name(&self) -> &'static str {
        "eth"
    }

    fn description(&self) -> &'static str {
        "Ethernet II"
    }

    fn patterns(&self) -> Vec<PathPattern> {
        vec![PathPattern::root()]
    }

    fn create_worker(&self, interner: &Interner) -> Box<dyn FrameWorker> {
        Box::new(EthernetWorker {
            token: interner.intern("eth"),
            dst: interner.field("eth.dst", "Destination"),
            src: interner.field("eth.src", "Source"),
            ethertype: interner.field("eth.type", "Type"),
        })
    }
}

struct EthernetWorker {
    token: Symbol,
    dst: FieldDef,
    src: FieldDef,
    ethertype: FieldDef,
}

impl FrameWorker for EthernetWorker {
    fn analyze(&self, cx: &Analysis<'_>) -> Option<LayerBuilder> {
        if cx.link_type() != LINKTYPE_ETHERNET {
            return None;
        }

        let mut layer = cx.child(&self.token);
        let dst = layer.read_bytes(&self.dst, 0, 6);
        let src = layer.read_bytes(&self.src, 6, 6);
        let ethertype = layer.read_u16(&self.ethertype, 12);
        layer.set_payload_from(ETH_HEADER_LEN);

        if let (Some(src), Some(dst), Some(ethertype)) = (src, dst, ethertype) {
            layer.set_summary(format_compact!(
                "{} → {} type 0x{ethertype:04x}",
                format_mac(&src),
                format_mac(&dst)
            ));
        }
        Some(layer)
    }
}
