//! Convenient re-exports for common usage.
//!
//! # Example
//!
//! ```rust,no_run
//! use layerscope_core::prelude::*;
//! use std::sync::Arc;
//!
//! let session = Session::new(Arc::new(default_registry()), SessionConfig::default());
//! let cursor = session.store().open_cursor();
//! ```

// Session types
pub use crate::config::SessionConfig;
pub use crate::session::{Pipeline, Session};

// Dissection types
pub use crate::dissector::{
    Analysis, Chunk, Dissector, FrameWorker, Registry, StreamDissector, StreamWorker,
};
pub use crate::intern::{FieldDef, Interner, Symbol};
pub use crate::layer::{AttrValue, Layer, LayerBuilder, LayerTree, PathPattern};
pub use crate::protocol::default_registry;

// Frames and storage
pub use crate::frame::{Frame, RawFrame};
pub use crate::store::{CursorId, Dequeued, FrameStore, StoreConfig};
pub use crate::stream::{StreamConfig, StreamKey};

// Filtering
pub use crate::filter::{compile, AliasTable, Predicate};

// Capture import
pub use crate::pcap::CaptureReader;

// Error types
pub use crate::error::{Error, Result};
