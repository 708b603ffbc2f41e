//! Session configuration.

use crate::dissector::DEFAULT_MAX_DEPTH;
use crate::store::StoreConfig;
use crate::stream::StreamConfig;

/// Configuration for a [`Session`](crate::session::Session).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Threads used for the frame-scoped phase of a batch.
    pub threads: usize,
    /// Frames dissected and published together by the pipeline.
    pub batch_size: usize,
    /// Deepest namespace path the dispatcher expands.
    pub max_depth: usize,
    pub stream: StreamConfig,
    pub store: StoreConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            batch_size: 1024,
            max_depth: DEFAULT_MAX_DEPTH,
            stream: StreamConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }
}
