//! Pluggable dissectors and the dispatch engine.
//!
//! A dissector registers namespace patterns and a worker factory. Two kinds
//! exist:
//!
//! - [`Dissector`] is frame-scoped. Its worker is created once per session
//!   and asked to decode a child of every layer whose path matches.
//! - [`StreamDissector`] is stream-scoped. One worker exists per stream key;
//!   it sees reassembled chunks in order and keeps state across them.
//!
//! Declining (returning `None`) is the normal answer for content that does
//! not look like the dissector's protocol.

mod context;
mod dispatch;
mod registry;

use crate::intern::Interner;
use crate::layer::{LayerBuilder, PathPattern};
use crate::stream::{StreamBuffer, StreamKey};

pub use context::Analysis;
pub use dispatch::Dispatcher;
pub use registry::Registry;

/// Default bound on layer depth during dispatch.
pub const DEFAULT_MAX_DEPTH: usize = 16;

/// A frame-scoped dissector.
pub trait Dissector: Send + Sync {
    /// Namespace token for layers this dissector emits (e.g. "udp").
    fn name(&self) -> &'static str;

    /// Human-readable description.
    fn description(&self) -> &'static str {
        self.name()
    }

    /// Paths of parent layers this dissector should be offered.
    fn patterns(&self) -> Vec<PathPattern>;

    /// Create the per-session worker. Attribute identifiers should be
    /// interned here rather than per frame.
    fn create_worker(&self, interner: &Interner) -> Box<dyn FrameWorker>;

    /// Release a worker at session end.
    fn destroy_worker(&self, worker: Box<dyn FrameWorker>) {
        drop(worker);
    }
}

/// Per-session state of a frame-scoped dissector.
///
/// Workers are shared by the dissection threads, so `analyze` takes `&self`.
pub trait FrameWorker: Send + Sync {
    /// Decode a child of the layer under analysis, or decline.
    fn analyze(&self, cx: &Analysis<'_>) -> Option<LayerBuilder>;
}

/// A stream-scoped dissector.
pub trait StreamDissector: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str {
        self.name()
    }

    /// Paths of stream anchor layers whose streams this dissector reads.
    fn patterns(&self) -> Vec<PathPattern>;

    /// Create the worker for a previously unseen stream key.
    fn create_worker(&self, key: &StreamKey, interner: &Interner) -> Box<dyn StreamWorker>;

    /// Release a worker when its stream expires or the session ends.
    fn destroy_worker(&self, worker: Box<dyn StreamWorker>) {
        drop(worker);
    }
}

/// State for one stream. Never called concurrently for the same key.
pub trait StreamWorker: Send {
    /// Inspect newly reassembled bytes and optionally emit one layer, which
    /// is attached below the anchor layer of the frame that completed the
    /// chunk.
    fn analyze(&mut self, chunk: &Chunk<'_>) -> Option<LayerBuilder>;
}

/// Newly contiguous bytes of a stream.
pub struct Chunk<'a> {
    pub key: &'a StreamKey,
    /// Offset of `data` within the stream
    pub offset: usize,
    pub data: &'a [u8],
    /// Everything reassembled so far, for workers that parse across chunks
    pub stream: &'a StreamBuffer,
    /// Sequence number of the frame that completed this chunk
    pub frame_seq: u64,
    pub timestamp_ns: u64,
}
