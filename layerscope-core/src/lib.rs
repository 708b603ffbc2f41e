//! # layerscope-core
//!
//! Protocol layer dissection engine.
//!
//! Captured frames are decoded into trees of namespaced layers by pluggable
//! dissectors, stored in an append-only log that any number of readers
//! consume through independent cursors, and selected with compiled filter
//! expressions.
//!
//! ## Features
//!
//! - **Pluggable dissectors**: frame-scoped workers matched by namespace
//!   path patterns, plus stream-scoped workers over reassembled data
//! - **Concurrent frame store**: batches published atomically, blocking and
//!   timed dequeue per cursor, optional eviction of consumed frames
//! - **Filter expressions**: `udp.src == 53 && !tcp`, tags, path patterns
//! - **Capture import**: classic pcap in every byte order and precision,
//!   optionally gzip-compressed
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use layerscope_core::prelude::*;
//! use std::sync::Arc;
//!
//! let session = Session::new(Arc::new(default_registry()), SessionConfig::default());
//! let predicate = compile("udp.dst == 53", &AliasTable::new()).unwrap();
//!
//! let reader = CaptureReader::open("capture.pcap").unwrap();
//! for raw in reader {
//!     let frame = session.ingest(raw.unwrap()).unwrap();
//!     if predicate.matches(&frame) {
//!         println!("{} {}", frame.seq(), frame.protocol_path());
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        layerscope-core                              |
//! +---------------------------------------------------------------------+
//! |  layer/      - Attributes, layers, namespace paths, layer trees     |
//! |  dissector/  - Dissector traits, registry, dispatch loop            |
//! |  protocol/   - Ethernet, IPv4, UDP, TCP, HTTP dissectors            |
//! |  stream/     - Stream buffers, reassembly, stream worker table      |
//! |  store/      - Append-only frame log with cursors                   |
//! |  filter/     - Filter grammar, compiler, predicates                 |
//! |  pcap/       - Capture file import                                  |
//! |  session/    - Session lifecycle and dissection pipeline            |
//! |  error/      - Error types                                          |
//! +---------------------------------------------------------------------+
//! ```

pub mod config;
pub mod dissector;
pub mod error;
pub mod filter;
pub mod frame;
pub mod intern;
pub mod layer;
pub mod pcap;
pub mod prelude;
pub mod protocol;
pub mod session;
pub mod store;
pub mod stream;

pub use config::SessionConfig;
pub use dissector::{
    Analysis, Chunk, Dispatcher, Dissector, FrameWorker, Registry, StreamDissector, StreamWorker,
    DEFAULT_MAX_DEPTH,
};
pub use error::{CaptureError, Error, FilterError, Result, StoreError, StreamError};
pub use filter::{compile, AliasTable, Predicate};
pub use frame::{Frame, RawFrame, LINKTYPE_ETHERNET};
pub use intern::{FieldDef, Interner, Symbol};
pub use layer::{
    AttrValue, Attribute, ByteRange, Layer, LayerBuilder, LayerId, LayerTree, NamespacePath,
    PathPattern,
};
pub use pcap::{CaptureFormat, CaptureReader, Compression};
pub use protocol::default_registry;
pub use session::{Pipeline, Session};
pub use store::{CursorId, Dequeued, FrameStore, StoreConfig};
pub use stream::{BufferBacking, StreamConfig, StreamKey};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
