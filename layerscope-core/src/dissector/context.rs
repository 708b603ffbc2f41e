//! What a frame-scoped worker sees while analyzing one layer.

use crate::frame::RawFrame;
use crate::intern::Symbol;
use crate::layer::{AttrValue, Layer, LayerBuilder, LayerId, LayerTree};

/// The layer under analysis together with its frame and ancestors.
pub struct Analysis<'a> {
    frame: &'a RawFrame,
    tree: &'a LayerTree,
    layer: LayerId,
}

impl<'a> Analysis<'a> {
    pub fn new(frame: &'a RawFrame, tree: &'a LayerTree, layer: LayerId) -> Self {
        Self { frame, tree, layer }
    }

    pub fn link_type(&self) -> u32 {
        self.frame.link_type
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.frame.timestamp_ns
    }

    pub fn frame_seq(&self) -> u64 {
        self.frame.seq
    }

    /// The parent layer being offered to the dissector.
    pub fn layer(&self) -> &'a Layer {
        &self.tree[self.layer]
    }

    /// Payload bytes of the layer under analysis.
    pub fn payload(&self) -> &'a [u8] {
        let range = self.layer().payload();
        let data = &self.frame.data;
        let end = range.end().min(data.len());
        &data[range.offset.min(end)..end]
    }

    /// Value of an error-free attribute on the layer under analysis.
    pub fn attr(&self, id: &str) -> Option<&'a AttrValue> {
        self.layer().value(id)
    }

    /// Like [`attr`](Self::attr), but searches ancestors as well.
    pub fn lookup(&self, id: &str) -> Option<&'a AttrValue> {
        self.tree.ancestors(self.layer).find_map(|l| l.value(id))
    }

    /// Start a child layer covering the payload of the layer under analysis.
    pub fn child(&self, token: &Symbol) -> LayerBuilder {
        LayerBuilder::new(
            token.clone(),
            self.frame.data.clone(),
            self.layer().payload(),
        )
    }
}
