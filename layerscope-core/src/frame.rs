//! Raw and dissected frames.

use bytes::Bytes;

use crate::layer::{Layer, LayerTree};

/// Link type for Ethernet (DLT_EN10MB).
pub const LINKTYPE_ETHERNET: u32 = 1;

/// A captured frame as delivered by an importer.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Arrival sequence number, starting at 1
    pub seq: u64,
    /// Capture time in nanoseconds since the Unix epoch
    pub timestamp_ns: u64,
    pub link_type: u32,
    pub captured_len: u32,
    /// Length on the wire before snaplen truncation
    pub original_len: u32,
    pub data: Bytes,
}

impl RawFrame {
    /// Ethernet frame with no truncation, mostly for tests and synthetic input.
    pub fn ethernet(seq: u64, timestamp_ns: u64, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let len = data.len() as u32;
        Self {
            seq,
            timestamp_ns,
            link_type: LINKTYPE_ETHERNET,
            captured_len: len,
            original_len: len,
            data,
        }
    }
}

/// A frame with its completed layer tree. Immutable once built.
#[derive(Debug, Clone)]
pub struct Frame {
    seq: u64,
    timestamp_ns: u64,
    link_type: u32,
    captured_len: u32,
    original_len: u32,
    data: Bytes,
    layers: LayerTree,
}

impl Frame {
    pub fn new(raw: RawFrame, layers: LayerTree) -> Self {
        Self {
            seq: raw.seq,
            timestamp_ns: raw.timestamp_ns,
            link_type: raw.link_type,
            captured_len: raw.captured_len,
            original_len: raw.original_len,
            data: raw.data,
            layers,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub fn link_type(&self) -> u32 {
        self.link_type
    }

    pub fn captured_len(&self) -> u32 {
        self.captured_len
    }

    pub fn original_len(&self) -> u32 {
        self.original_len
    }

    /// The capture kept fewer bytes than were on the wire.
    pub fn is_truncated(&self) -> bool {
        self.captured_len < self.original_len
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn layers(&self) -> &LayerTree {
        &self.layers
    }

    /// First layer whose path ends in `token`.
    pub fn layer(&self, token: &str) -> Option<&Layer> {
        self.layers.find(token)
    }

    /// `eth → ipv4 → udp` style path of the deepest layer.
    pub fn protocol_path(&self) -> String {
        self.layers.deepest().path().to_string()
    }
}
