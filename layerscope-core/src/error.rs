//! Error types for layerscope-core.
//!
//! Dissection itself never fails: short or malformed input is recorded as
//! error flags on attributes and layers. The types here cover the fallible
//! edges of the engine:
//!
//! - [`enum@Error`] - Main error enum that wraps all error types
//! - [`CaptureError`] - Errors from capture file import
//! - [`FilterError`] - Errors from filter compilation
//! - [`StreamError`] - Errors from stream buffer backing storage
//! - [`StoreError`] - Errors from frame store misuse

use thiserror::Error;

pub use crate::filter::FilterError;
use crate::store::CursorId;

/// Main error type for layerscope-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Error reading or parsing a capture file
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Error compiling a filter expression
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    /// Error allocating or growing stream storage
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Error using the frame store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The dissection thread could not be joined
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to capture file import.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// File not found
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// The first four bytes are not a known capture magic number
    #[error("Unknown capture magic: 0x{magic:08x}")]
    BadMagic { magic: u32 },

    /// Recognised but unsupported container
    #[error("Unsupported capture format: {format}")]
    Unsupported { format: &'static str },

    /// Header or record could not be parsed
    #[error("Invalid capture format: {reason}")]
    InvalidFormat { reason: String },
}

/// Errors related to stream buffer storage.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Mapping or file backing could not be created or grown
    #[error("{backing} stream buffer: {source}")]
    Backing {
        backing: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Backing name not recognised when parsed from text
    #[error("unknown buffer backing '{name}' (expected heap, anon or file)")]
    UnknownBacking { name: String },
}

/// Errors related to the frame store.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// Insert after the store was closed
    #[error("Frame store is closed")]
    Closed,

    /// Cursor id was never opened or was already released
    #[error("Unknown cursor: {0}")]
    UnknownCursor(CursorId),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
