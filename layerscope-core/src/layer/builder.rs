//! Incremental construction of a layer by a dissector.
//!
//! Offsets passed to the `read_*` helpers are relative to the start of the
//! layer. A read past the end of the layer records the attribute with a
//! `Null` value and its error flag set, then returns `None`; the dissector
//! keeps going with the remaining fields.

use bytes::Bytes;
use compact_str::CompactString;

use super::{AttrValue, Attribute, ByteRange, Layer, NamespacePath, StreamAnchor};
use crate::intern::{FieldDef, Symbol};
use crate::stream::StreamKey;

/// A layer under construction.
#[derive(Debug)]
pub struct LayerBuilder {
    token: Symbol,
    data: Bytes,
    range: ByteRange,
    payload: Option<ByteRange>,
    summary: CompactString,
    attrs: Vec<Attribute>,
    tags: Vec<Symbol>,
    error: bool,
    stream: Option<StreamAnchor>,
}

impl LayerBuilder {
    /// Builder over `range` of the frame bytes `data`.
    pub(crate) fn new(token: Symbol, data: Bytes, range: ByteRange) -> Self {
        Self {
            token,
            data,
            range,
            payload: None,
            summary: CompactString::default(),
            attrs: Vec::new(),
            tags: Vec::new(),
            error: false,
            stream: None,
        }
    }

    /// Builder with no backing frame bytes.
    ///
    /// Used by stream dissectors, whose input comes from a reassembled
    /// buffer rather than the triggering frame. Attributes carry no byte
    /// range and the layer is attached over its anchor's payload.
    pub fn detached(token: Symbol) -> Self {
        Self::new(token, Bytes::new(), ByteRange::default())
    }

    pub fn token(&self) -> &Symbol {
        &self.token
    }

    /// Bytes covered by this layer.
    pub fn bytes(&self) -> &[u8] {
        let end = self.range.end().min(self.data.len());
        &self.data[self.range.offset.min(end)..end]
    }

    pub fn len(&self) -> usize {
        self.range.len
    }

    pub fn is_empty(&self) -> bool {
        self.range.len == 0
    }

    fn locate(&self, offset: usize, len: usize) -> Option<ByteRange> {
        let end = offset.checked_add(len)?;
        if end > self.range.len || self.range.offset + end > self.data.len() {
            return None;
        }
        Some(ByteRange::new(self.range.offset + offset, len))
    }

    fn read(&mut self, field: &FieldDef, offset: usize, len: usize) -> Option<(ByteRange, Bytes)> {
        match self.locate(offset, len) {
            Some(range) => Some((range, range.slice(&self.data))),
            None => {
                self.attrs.push(Attribute::missing(field));
                None
            }
        }
    }

    pub fn read_u8(&mut self, field: &FieldDef, offset: usize) -> Option<u8> {
        let (range, bytes) = self.read(field, offset, 1)?;
        let v = bytes[0];
        self.attrs.push(Attribute::new(field, v).with_range(range));
        Some(v)
    }

    /// Big-endian u16.
    pub fn read_u16(&mut self, field: &FieldDef, offset: usize) -> Option<u16> {
        let (range, bytes) = self.read(field, offset, 2)?;
        let v = u16::from_be_bytes([bytes[0], bytes[1]]);
        self.attrs.push(Attribute::new(field, v).with_range(range));
        Some(v)
    }

    /// Big-endian u32.
    pub fn read_u32(&mut self, field: &FieldDef, offset: usize) -> Option<u32> {
        let (range, bytes) = self.read(field, offset, 4)?;
        let v = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        self.attrs.push(Attribute::new(field, v).with_range(range));
        Some(v)
    }

    /// Big-endian u64.
    pub fn read_u64(&mut self, field: &FieldDef, offset: usize) -> Option<u64> {
        let (range, bytes) = self.read(field, offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        let v = u64::from_be_bytes(raw);
        self.attrs.push(Attribute::new(field, v).with_range(range));
        Some(v)
    }

    /// UTF-8 text. Invalid sequences are replaced and flag the attribute.
    pub fn read_str(&mut self, field: &FieldDef, offset: usize, len: usize) -> Option<CompactString> {
        let (range, bytes) = self.read(field, offset, len)?;
        let (text, lossy) = match std::str::from_utf8(&bytes) {
            Ok(s) => (CompactString::new(s), false),
            Err(_) => (CompactString::new(String::from_utf8_lossy(&bytes)), true),
        };
        let attr = self.push(Attribute::new(field, text.clone()).with_range(range));
        attr.error = lossy;
        Some(text)
    }

    /// Raw bytes, shared with the frame buffer.
    pub fn read_bytes(&mut self, field: &FieldDef, offset: usize, len: usize) -> Option<Bytes> {
        let (range, bytes) = self.read(field, offset, len)?;
        self.attrs
            .push(Attribute::new(field, bytes.clone()).with_range(range));
        Some(bytes)
    }

    /// Record a derived value with no byte provenance.
    pub fn attr(&mut self, field: &FieldDef, value: impl Into<AttrValue>) -> &mut Attribute {
        self.push(Attribute::new(field, value))
    }

    /// Record a value decoded from `len` bytes at `offset`. An out-of-range
    /// span keeps the value but flags the attribute.
    pub fn attr_at(
        &mut self,
        field: &FieldDef,
        value: impl Into<AttrValue>,
        offset: usize,
        len: usize,
    ) -> &mut Attribute {
        match self.locate(offset, len) {
            Some(range) => self.push(Attribute::new(field, value).with_range(range)),
            None => {
                let mut attr = Attribute::new(field, value);
                attr.error = true;
                self.push(attr)
            }
        }
    }

    /// Nest a derived sub-attribute under the most recent `parent` attribute.
    /// Returns `false` if there is no such attribute.
    pub fn child_attr(&mut self, parent: &str, field: &FieldDef, value: impl Into<AttrValue>) -> bool {
        match self.find_mut(parent) {
            Some(attr) => {
                attr.children.push(Attribute::new(field, value));
                true
            }
            None => false,
        }
    }

    pub fn push(&mut self, attr: Attribute) -> &mut Attribute {
        self.attrs.push(attr);
        let last = self.attrs.len() - 1;
        &mut self.attrs[last]
    }

    /// Most recent attribute with identifier `id`.
    pub fn find_mut(&mut self, id: &str) -> Option<&mut Attribute> {
        self.attrs.iter_mut().rev().find(|a| a.id.as_str() == id)
    }

    pub fn set_summary(&mut self, summary: impl Into<CompactString>) {
        self.summary = summary.into();
    }

    pub fn tag(&mut self, tag: Symbol) {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    /// Set the payload handed to child layers, relative to the layer start.
    /// A payload extending past the layer is clamped and flags the layer.
    pub fn set_payload(&mut self, offset: usize, len: usize) {
        let wanted = ByteRange::new(self.range.offset.saturating_add(offset), len);
        if !self.range.contains(&wanted) {
            self.error = true;
        }
        self.payload = Some(self.range.clamp(&wanted));
    }

    /// Payload from `offset` to the end of the layer.
    pub fn set_payload_from(&mut self, offset: usize) {
        let len = self.range.len.saturating_sub(offset);
        self.set_payload(offset, len);
    }

    /// Shrink the layer itself, e.g. to a length field in the header.
    pub fn truncate(&mut self, len: usize) {
        if len > self.range.len {
            self.error = true;
        } else {
            self.range.len = len;
        }
    }

    /// Feed this layer's payload into the stream identified by `key`.
    pub fn set_stream(&mut self, key: StreamKey, seq: Option<u32>) {
        self.stream = Some(StreamAnchor { key, seq });
    }

    pub fn mark_error(&mut self) {
        self.error = true;
    }

    /// Whether the layer or any of its attributes is flagged.
    pub fn has_error(&self) -> bool {
        self.error || self.attrs.iter().any(|a| a.error)
    }

    pub fn attrs(&self) -> &[Attribute] {
        &self.attrs
    }

    /// Finish the layer below `parent`. Detached builders take `fallback`
    /// as their extent.
    pub(crate) fn finish(self, parent: &NamespacePath, fallback: ByteRange) -> Layer {
        let range = if self.data.is_empty() { fallback } else { self.range };
        let error = self.has_error();
        let mut layer = Layer::new(parent.child(self.token), range);
        layer.summary = self.summary;
        layer.error = error;
        if let Some(payload) = self.payload {
            layer.payload = payload;
        } else if !self.data.is_empty() {
            layer.payload = ByteRange::new(range.end(), 0);
        }
        for tag in self.tags {
            layer.add_tag(tag);
        }
        for attr in self.attrs {
            layer.push_attr(attr);
        }
        layer.stream = self.stream;
        layer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;

    #[test]
    fn test_truncated_read_flags_only_that_attribute() {
        let interner = Interner::new();
        let src = interner.field("udp.src", "Source Port");
        let dst = interner.field("udp.dst", "Destination Port");
        let len = interner.field("udp.len", "Length");

        let data = Bytes::from_static(&[0x00, 0x35, 0x00, 0x50, 0x00]);
        let mut builder = LayerBuilder::new(interner.intern("udp"), data, ByteRange::new(0, 5));

        assert_eq!(builder.read_u16(&src, 0), Some(53));
        assert_eq!(builder.read_u16(&dst, 2), Some(80));
        assert_eq!(builder.read_u16(&len, 4), None);

        let attrs = builder.attrs();
        assert!(!attrs[0].error);
        assert!(!attrs[1].error);
        assert!(attrs[2].error);
        assert!(attrs[2].value.is_null());
        assert!(builder.has_error());
    }

    #[test]
    fn test_read_bytes_shares_frame_buffer() {
        let interner = Interner::new();
        let mac = interner.field("eth.dst", "Destination");
        let data = Bytes::from(vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let mut builder = LayerBuilder::new(interner.intern("eth"), data.clone(), ByteRange::new(2, 6));

        let slice = builder.read_bytes(&mac, 0, 4).unwrap();
        assert_eq!(slice.as_ref(), &[3, 4, 5, 6]);
        assert_eq!(slice.as_ptr(), data[2..].as_ptr());
        assert_eq!(builder.attrs()[0].range, Some(ByteRange::new(2, 4)));
    }

    #[test]
    fn test_payload_is_clamped() {
        let interner = Interner::new();
        let data = Bytes::from(vec![0u8; 10]);
        let mut builder = LayerBuilder::new(interner.intern("ipv4"), data, ByteRange::new(0, 10));
        builder.set_payload(4, 20);

        let layer = builder.finish(&NamespacePath::root(), ByteRange::default());
        assert!(layer.has_error());
        assert_eq!(layer.payload(), ByteRange::new(4, 6));
    }

    #[test]
    fn test_detached_builder_uses_fallback_extent() {
        let interner = Interner::new();
        let method = interner.field("http.method", "Method");
        let mut builder = LayerBuilder::detached(interner.intern("http"));
        builder.attr(&method, "GET");

        let layer = builder.finish(&NamespacePath::root(), ByteRange::new(54, 30));
        assert_eq!(layer.range(), ByteRange::new(54, 30));
        assert_eq!(layer.payload(), ByteRange::new(54, 30));
        assert_eq!(layer.value("http.method"), Some(&AttrValue::from("GET")));
    }
}
