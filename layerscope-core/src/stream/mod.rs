//! Stream reassembly and stream-scoped dissection state.
//!
//! Layers flagged as stream anchors (see
//! [`LayerBuilder::set_stream`](crate::layer::LayerBuilder::set_stream))
//! have their payload appended to a per-key [`StreamBuffer`] through a
//! [`Reassembler`]. Every append that yields new contiguous bytes is handed
//! to the stream dissectors registered for the anchor's path. The
//! [`StreamTable`] owns those buffers and workers and expires idle ones.

mod buffer;
mod reassembly;
mod table;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use compact_str::CompactString;

use crate::error::StreamError;

pub use buffer::StreamBuffer;
pub use reassembly::{Reassembler, SequenceGap};
pub use table::{StreamTable, WorkerState};

/// Identity of one logical stream, e.g. one direction of a TCP connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey(CompactString);

impl StreamKey {
    pub fn new(key: impl Into<CompactString>) -> Self {
        StreamKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StreamKey {
    fn from(key: &str) -> Self {
        StreamKey::new(key)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage behind a [`StreamBuffer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BufferBacking {
    /// Growable heap vector
    #[default]
    Heap,
    /// Anonymous shared memory mapping
    Anonymous,
    /// Mapping of an unlinked temporary file
    File,
}

impl BufferBacking {
    pub fn name(&self) -> &'static str {
        match self {
            BufferBacking::Heap => "heap",
            BufferBacking::Anonymous => "anon",
            BufferBacking::File => "file",
        }
    }
}

impl fmt::Display for BufferBacking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BufferBacking {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "heap" => Ok(BufferBacking::Heap),
            "anon" | "anonymous" | "mmap" => Ok(BufferBacking::Anonymous),
            "file" => Ok(BufferBacking::File),
            _ => Err(StreamError::UnknownBacking { name: s.to_string() }),
        }
    }
}

/// Configuration for stream processing.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Workers idle longer than this are destroyed by the sweep.
    pub idle_timeout: Duration,
    /// Minimum capture-time interval between automatic sweeps.
    pub sweep_interval: Duration,
    pub backing: BufferBacking,
    /// Initial reservation per stream buffer (bytes).
    pub initial_capacity: usize,
    /// Maximum bytes kept per stream; appends beyond it are dropped.
    pub max_stream_bytes: usize,
    /// Out-of-order segments held per stream before a gap is skipped.
    pub max_pending_segments: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(60),
            backing: BufferBacking::Heap,
            initial_capacity: 64 * 1024,
            max_stream_bytes: 16 * 1024 * 1024, // 16 MB per stream
            max_pending_segments: 1024,
        }
    }
}

impl StreamConfig {
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_backing(mut self, backing: BufferBacking) -> Self {
        self.backing = backing;
        self
    }

    pub fn with_max_stream_bytes(mut self, max: usize) -> Self {
        self.max_stream_bytes = max;
        self
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backing_from_str() {
        assert_eq!("heap".parse::<BufferBacking>().unwrap(), BufferBacking::Heap);
        assert_eq!("ANON".parse::<BufferBacking>().unwrap(), BufferBacking::Anonymous);
        assert_eq!("file".parse::<BufferBacking>().unwrap(), BufferBacking::File);

        let err = "disk".parse::<BufferBacking>().unwrap_err();
        assert!(matches!(&err, StreamError::UnknownBacking { name } if name == "disk"));
        assert_eq!(
            err.to_string(),
            "unknown buffer backing 'disk' (expected heap, anon or file)"
        );
    }

    #[test]
    fn test_default_idle_timeout_is_ten_minutes() {
        assert_eq!(StreamConfig::default().idle_timeout, Duration::from_secs(600));
    }
}
