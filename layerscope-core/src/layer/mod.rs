//! The attribute/layer model.
//!
//! A dissected frame is a tree of [`Layer`]s rooted at a synthetic layer that
//! covers the whole raw frame. Layers are stored in one arena (`LayerTree`)
//! and addressed by [`LayerId`], so a frame's tree is a single allocation
//! that is dropped as a whole.
//!
//! Byte ranges are offsets into the owning frame's raw buffer. A child
//! layer's range always lies inside its parent's payload; `push_child`
//! clamps and flags layers that claim more.

mod builder;
mod path;
mod value;

use std::fmt;
use std::ops::Index;

use bytes::Bytes;
use compact_str::CompactString;
use smallvec::SmallVec;

use crate::intern::{FieldDef, Symbol};
use crate::stream::StreamKey;

pub use builder::LayerBuilder;
pub use path::{Anchor, NamespacePath, PathPattern, PatternError, Token};
pub use value::AttrValue;

/// Offset and length into a frame's raw bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub offset: usize,
    pub len: usize,
}

impl ByteRange {
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub const fn end(&self) -> usize {
        self.offset + self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `other` lies entirely within this range.
    pub fn contains(&self, other: &ByteRange) -> bool {
        other.offset >= self.offset && other.end() <= self.end()
    }

    /// Clamp `other` into this range. Never returns a range outside `self`.
    pub fn clamp(&self, other: &ByteRange) -> ByteRange {
        let start = other.offset.clamp(self.offset, self.end());
        let end = other.end().clamp(start, self.end());
        ByteRange::new(start, end - start)
    }

    /// Zero-copy view of these bytes within `data`.
    pub fn slice(&self, data: &Bytes) -> Bytes {
        let end = self.end().min(data.len());
        let start = self.offset.min(end);
        data.slice(start..end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.offset, self.end())
    }
}

/// One decoded field of a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Fully-qualified identifier, e.g. `udp.src`
    pub id: Symbol,
    /// Human-readable name
    pub name: CompactString,
    pub value: AttrValue,
    /// Provenance in the frame's raw bytes
    pub range: Option<ByteRange>,
    /// Nested sub-attributes for structured fields
    pub children: Vec<Attribute>,
    /// Set when the bytes were short, malformed or out of range
    pub error: bool,
}

impl Attribute {
    pub fn new(field: &FieldDef, value: impl Into<AttrValue>) -> Self {
        Self {
            id: field.id.clone(),
            name: CompactString::new(field.name),
            value: value.into(),
            range: None,
            children: Vec::new(),
            error: false,
        }
    }

    /// An attribute whose bytes could not be read.
    pub fn missing(field: &FieldDef) -> Self {
        Self {
            error: true,
            ..Self::new(field, AttrValue::Null)
        }
    }

    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_name(mut self, name: impl Into<CompactString>) -> Self {
        self.name = name.into();
        self
    }

    /// Direct sub-attribute lookup.
    pub fn child(&self, id: &str) -> Option<&Attribute> {
        self.children.iter().find(|a| a.id.as_str() == id)
    }

    /// This attribute and every nested sub-attribute, depth first.
    pub fn walk(&self) -> AttributeWalk<'_> {
        AttributeWalk { stack: vec![self] }
    }
}

/// Depth-first iterator over an attribute and its sub-attributes.
pub struct AttributeWalk<'a> {
    stack: Vec<&'a Attribute>,
}

impl<'a> Iterator for AttributeWalk<'a> {
    type Item = &'a Attribute;

    fn next(&mut self) -> Option<Self::Item> {
        let attr = self.stack.pop()?;
        self.stack.extend(attr.children.iter().rev());
        Some(attr)
    }
}

/// Marks a layer whose payload feeds a stream buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAnchor {
    pub key: StreamKey,
    /// Sequence number of the first payload byte, if the transport has one
    pub seq: Option<u32>,
}

/// Index of a layer within its [`LayerTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(u32);

impl LayerId {
    pub const ROOT: LayerId = LayerId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A decoded protocol layer.
#[derive(Debug, Clone)]
pub struct Layer {
    path: NamespacePath,
    summary: CompactString,
    range: ByteRange,
    payload: ByteRange,
    attrs: Vec<Attribute>,
    parent: Option<LayerId>,
    children: SmallVec<[LayerId; 2]>,
    tags: SmallVec<[Symbol; 2]>,
    error: bool,
    stream: Option<StreamAnchor>,
}

impl Layer {
    /// Create a layer spanning `range`, whose payload is initially the same
    /// range.
    pub fn new(path: NamespacePath, range: ByteRange) -> Self {
        Self {
            path,
            summary: CompactString::default(),
            range,
            payload: range,
            attrs: Vec::new(),
            parent: None,
            children: SmallVec::new(),
            tags: SmallVec::new(),
            error: false,
            stream: None,
        }
    }

    pub fn path(&self) -> &NamespacePath {
        &self.path
    }

    /// The last token of the path, `None` for the root layer.
    pub fn token(&self) -> Option<&Symbol> {
        self.path.last()
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn set_summary(&mut self, summary: impl Into<CompactString>) {
        self.summary = summary.into();
    }

    /// Bytes this layer covers, header included.
    pub fn range(&self) -> ByteRange {
        self.range
    }

    /// Bytes handed on to child layers.
    pub fn payload(&self) -> ByteRange {
        self.payload
    }

    /// Narrow the payload. Ranges outside the layer are clamped and flag the
    /// layer as malformed.
    pub fn set_payload(&mut self, payload: ByteRange) {
        if !self.range.contains(&payload) {
            self.error = true;
        }
        self.payload = self.range.clamp(&payload);
    }

    pub fn attrs(&self) -> &[Attribute] {
        &self.attrs
    }

    /// Append an attribute. An attribute whose range falls outside this
    /// layer keeps its value but is flagged as erroneous.
    pub fn push_attr(&mut self, mut attr: Attribute) -> &mut Attribute {
        if let Some(range) = attr.range {
            if !self.range.contains(&range) {
                attr.error = true;
            }
        }
        self.attrs.push(attr);
        let last = self.attrs.len() - 1;
        &mut self.attrs[last]
    }

    /// Look up a direct attribute by identifier.
    pub fn attr(&self, id: &str) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.id.as_str() == id)
    }

    /// Value of a direct attribute that decoded without error.
    pub fn value(&self, id: &str) -> Option<&AttrValue> {
        self.attr(id).filter(|a| !a.error).map(|a| &a.value)
    }

    pub fn parent(&self) -> Option<LayerId> {
        self.parent
    }

    pub fn children(&self) -> &[LayerId] {
        &self.children
    }

    pub fn tags(&self) -> &[Symbol] {
        &self.tags
    }

    pub fn add_tag(&mut self, tag: Symbol) {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.as_str() == tag)
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn mark_error(&mut self) {
        self.error = true;
    }

    pub fn stream(&self) -> Option<&StreamAnchor> {
        self.stream.as_ref()
    }

    pub fn set_stream(&mut self, anchor: StreamAnchor) {
        self.stream = Some(anchor);
    }
}

/// Arena holding every layer of one frame.
#[derive(Debug, Clone)]
pub struct LayerTree {
    layers: Vec<Layer>,
}

impl LayerTree {
    /// Create a tree whose root covers `frame_len` bytes.
    pub fn new(frame_len: usize) -> Self {
        let mut root = Layer::new(NamespacePath::root(), ByteRange::new(0, frame_len));
        root.set_summary("frame");
        let mut layers = Vec::with_capacity(8);
        layers.push(root);
        Self { layers }
    }

    pub fn root(&self) -> &Layer {
        &self.layers[0]
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id.index())
    }

    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.get_mut(id.index())
    }

    pub fn parent(&self, id: LayerId) -> Option<&Layer> {
        self.get(id)?.parent.and_then(|p| self.get(p))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// A tree always holds its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Attach `layer` below `parent`.
    ///
    /// The child's range is clamped into the parent's payload; a child that
    /// claimed bytes outside it is flagged as erroneous. Returns `None` if
    /// `parent` is not in this tree.
    pub fn push_child(&mut self, parent: LayerId, mut layer: Layer) -> Option<LayerId> {
        let bounds = self.get(parent)?.payload;
        if !bounds.contains(&layer.range) {
            layer.error = true;
            layer.range = bounds.clamp(&layer.range);
        }
        if !layer.range.contains(&layer.payload) {
            layer.error = true;
            layer.payload = layer.range.clamp(&layer.payload);
        }
        layer.parent = Some(parent);

        let id = LayerId(self.layers.len() as u32);
        self.layers.push(layer);
        self.layers[parent.index()].children.push(id);
        Some(id)
    }

    /// Layers in insertion order, root first.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Pre-order traversal starting at the root.
    pub fn iter(&self) -> impl Iterator<Item = (LayerId, &Layer)> + '_ {
        let mut stack = vec![LayerId::ROOT];
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            let layer = &self.layers[id.index()];
            stack.extend(layer.children.iter().rev().copied());
            Some((id, layer))
        })
    }

    /// Walk from `id` up to the root, `id` included.
    pub fn ancestors(&self, id: LayerId) -> impl Iterator<Item = &Layer> + '_ {
        let mut next = self.get(id);
        std::iter::from_fn(move || {
            let layer = next?;
            next = layer.parent.and_then(|p| self.get(p));
            Some(layer)
        })
    }

    /// First layer whose last path token is `token`.
    pub fn find(&self, token: &str) -> Option<&Layer> {
        self.layers
            .iter()
            .find(|l| l.token().is_some_and(|t| t.as_str() == token))
    }

    /// The most recently attached layer with the longest path.
    pub fn deepest(&self) -> &Layer {
        self.layers
            .iter()
            .rev()
            .max_by_key(|l| l.path.len())
            .unwrap_or(&self.layers[0])
    }

    /// Every attribute in the tree, nested ones included.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> + '_ {
        self.layers
            .iter()
            .flat_map(|l| l.attrs.iter())
            .flat_map(|a| a.walk())
    }
}

impl Index<LayerId> for LayerTree {
    type Output = Layer;

    fn index(&self, id: LayerId) -> &Layer {
        &self.layers[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;

    fn eth_path(interner: &Interner) -> NamespacePath {
        NamespacePath::root().child(interner.intern("eth"))
    }

    #[test]
    fn test_attr_lookup_is_direct_only() {
        let interner = Interner::new();
        let flags = interner.field("tcp.flags", "Flags");
        let syn = interner.field("tcp.flags.syn", "SYN");

        let mut layer = Layer::new(eth_path(&interner), ByteRange::new(0, 20));
        let attr = layer.push_attr(Attribute::new(&flags, 0x02u8));
        attr.children.push(Attribute::new(&syn, true));

        assert!(layer.attr("tcp.flags").is_some());
        assert!(layer.attr("tcp.flags.syn").is_none());
        assert!(layer.attr("tcp.missing").is_none());
        assert_eq!(
            layer.attr("tcp.flags").and_then(|a| a.child("tcp.flags.syn")).map(|a| &a.value),
            Some(&AttrValue::Bool(true))
        );
    }

    #[test]
    fn test_out_of_range_attribute_is_flagged() {
        let interner = Interner::new();
        let field = interner.field("eth.type", "Type");
        let mut layer = Layer::new(eth_path(&interner), ByteRange::new(0, 12));

        let attr = layer.push_attr(Attribute::new(&field, 0x0800u16).with_range(ByteRange::new(12, 2)));
        assert!(attr.error);
        assert!(layer.value("eth.type").is_none());
    }

    #[test]
    fn test_push_child_clamps_to_parent_payload() {
        let interner = Interner::new();
        let mut tree = LayerTree::new(64);
        let mut eth = Layer::new(eth_path(&interner), ByteRange::new(0, 64));
        eth.set_payload(ByteRange::new(14, 50));
        let eth_id = tree.push_child(LayerId::ROOT, eth).unwrap();

        let path = tree[eth_id].path().child(interner.intern("ipv4"));
        let ip_id = tree
            .push_child(eth_id, Layer::new(path, ByteRange::new(10, 100)))
            .unwrap();

        let ip = &tree[ip_id];
        assert!(ip.has_error());
        assert_eq!(ip.range(), ByteRange::new(14, 50));
        assert!(tree[eth_id].payload().contains(&ip.payload()));
        assert_eq!(ip.parent(), Some(eth_id));
    }

    #[test]
    fn test_iter_is_preorder() {
        let interner = Interner::new();
        let mut tree = LayerTree::new(10);
        let a = tree
            .push_child(LayerId::ROOT, Layer::new(eth_path(&interner), ByteRange::new(0, 10)))
            .unwrap();
        let b_path = tree[a].path().child(interner.intern("b"));
        tree.push_child(a, Layer::new(b_path, ByteRange::new(0, 5))).unwrap();
        let c_path = NamespacePath::root().child(interner.intern("c"));
        tree.push_child(LayerId::ROOT, Layer::new(c_path, ByteRange::new(0, 1))).unwrap();

        let order: Vec<String> = tree.iter().map(|(_, l)| l.path().to_string()).collect();
        assert_eq!(order, vec!["", "eth", "eth → b", "c"]);
        assert_eq!(tree.deepest().path().to_string(), "eth → b");
    }

    #[test]
    fn test_byte_range_clamp() {
        let outer = ByteRange::new(10, 10);
        assert_eq!(outer.clamp(&ByteRange::new(5, 100)), ByteRange::new(10, 10));
        assert_eq!(outer.clamp(&ByteRange::new(25, 4)), ByteRange::new(20, 0));
        assert!(outer.contains(&ByteRange::new(12, 3)));
        assert!(!outer.contains(&ByteRange::new(18, 3)));
    }
}
