//! Per-key stream state and stream worker lifetime.
//!
//! The outer map lock is held only to find, create or remove an entry.
//! Each entry has its own lock, so chunks for one key are serialized while
//! different keys proceed in parallel. Lock order is always map, then entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::{Reassembler, StreamBuffer, StreamConfig, StreamKey};
use crate::dissector::{Chunk, Registry, StreamWorker};
use crate::intern::Interner;
use crate::layer::{LayerBuilder, NamespacePath};

/// Lifecycle of the workers for one stream key.
///
/// `Expired` and `Closed` are terminal; a chunk arriving for the key after
/// expiry starts over with a fresh entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// First chunk seen
    Created,
    /// Receiving further chunks
    Active,
    /// Removed by the idle sweep
    Expired,
    /// Removed at session end
    Closed,
}

struct StreamEntry {
    key: StreamKey,
    state: WorkerState,
    last_updated: u64,
    feeds: u64,
    reassembler: Reassembler,
    buffer: StreamBuffer,
    workers: Vec<(usize, Box<dyn StreamWorker>)>,
}

type Workers = Vec<(usize, Box<dyn StreamWorker>)>;

/// Stream buffers and workers for every live stream key.
pub struct StreamTable {
    registry: Arc<Registry>,
    interner: Arc<Interner>,
    config: StreamConfig,
    entries: Mutex<HashMap<StreamKey, Arc<Mutex<StreamEntry>>>>,
    /// Capture time of the last sweep, `u64::MAX` before the first one.
    last_sweep: AtomicU64,
    closed: AtomicBool,
    expired_total: AtomicU64,
}

impl StreamTable {
    pub fn new(registry: Arc<Registry>, interner: Arc<Interner>, config: StreamConfig) -> Self {
        Self {
            registry,
            interner,
            config,
            entries: Mutex::new(HashMap::new()),
            last_sweep: AtomicU64::new(u64::MAX),
            closed: AtomicBool::new(false),
            expired_total: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Append one segment of the stream anchored at `path` and run the
    /// matching stream workers over whatever became contiguous.
    ///
    /// Returns the layers the workers emitted, in registration order.
    ///
    /// An empty sequenced segment (a SYN) only records where the stream
    /// starts; no worker is created or run for it.
    pub fn feed(
        &self,
        path: &NamespacePath,
        key: &StreamKey,
        seq: Option<u32>,
        data: &[u8],
        timestamp_ns: u64,
        frame_seq: u64,
    ) -> Vec<LayerBuilder> {
        let dissectors: SmallVec<[usize; 4]> = self.registry.matching_streams(path).collect();
        if dissectors.is_empty() || (data.is_empty() && seq.is_none()) {
            return Vec::new();
        }

        loop {
            if self.closed.load(Ordering::Acquire) {
                return Vec::new();
            }

            let entry = self.entry(key, timestamp_ns);
            let mut guard = entry.lock();
            if matches!(guard.state, WorkerState::Expired | WorkerState::Closed) {
                // Swept between lookup and lock; the map no longer holds it.
                continue;
            }

            if data.is_empty() {
                if let Some(seq) = seq {
                    guard.reassembler.anchor(seq);
                }
                guard.last_updated = guard.last_updated.max(timestamp_ns);
                return Vec::new();
            }

            guard.feeds += 1;
            if guard.feeds > 1 {
                guard.state = WorkerState::Active;
            }
            guard.last_updated = guard.last_updated.max(timestamp_ns);

            let StreamEntry {
                key,
                reassembler,
                buffer,
                workers,
                ..
            } = &mut *guard;

            let offset = buffer.len();
            let written = reassembler.push(seq, data, buffer);
            if written == 0 {
                return Vec::new();
            }

            for &index in &dissectors {
                if workers.iter().any(|(i, _)| *i == index) {
                    continue;
                }
                if let Some(dissector) = self.registry.stream_dissector(index) {
                    trace!(key = %key, dissector = dissector.name(), "creating stream worker");
                    workers.push((index, dissector.create_worker(key, &self.interner)));
                }
            }

            let chunk = Chunk {
                key,
                offset,
                data: buffer.read(offset, written),
                stream: buffer,
                frame_seq,
                timestamp_ns,
            };

            return workers
                .iter_mut()
                .filter(|(i, _)| dissectors.contains(i))
                .filter_map(|(_, worker)| worker.analyze(&chunk))
                .collect();
        }
    }

    fn entry(&self, key: &StreamKey, now: u64) -> Arc<Mutex<StreamEntry>> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key) {
            return Arc::clone(entry);
        }

        let buffer = StreamBuffer::new(
            self.config.backing,
            self.config.initial_capacity,
            self.config.max_stream_bytes,
        )
        .unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "falling back to heap stream buffer");
            StreamBuffer::heap(self.config.max_stream_bytes)
        });

        let entry = Arc::new(Mutex::new(StreamEntry {
            key: key.clone(),
            state: WorkerState::Created,
            last_updated: now,
            feeds: 0,
            reassembler: Reassembler::new(self.config.max_pending_segments),
            buffer,
            workers: Vec::new(),
        }));
        entries.insert(key.clone(), Arc::clone(&entry));
        entry
    }

    /// Run [`sweep`](Self::sweep) if `sweep_interval` of capture time has
    /// passed since the last one.
    pub fn maybe_sweep(&self, now: u64) -> usize {
        let last = self.last_sweep.load(Ordering::Relaxed);
        if last == u64::MAX {
            self.last_sweep.store(now, Ordering::Relaxed);
            return 0;
        }
        let interval = self.config.sweep_interval.as_nanos() as u64;
        if now.saturating_sub(last) < interval {
            return 0;
        }
        self.sweep(now)
    }

    /// Destroy every stream whose last chunk is older than the idle
    /// timeout. Returns the number of streams removed.
    pub fn sweep(&self, now: u64) -> usize {
        let idle = self.config.idle_timeout.as_nanos() as u64;
        let mut expired: Vec<Workers> = Vec::new();

        {
            let mut entries = self.entries.lock();
            entries.retain(|_, entry| {
                let mut entry = entry.lock();
                if now.saturating_sub(entry.last_updated) > idle {
                    entry.state = WorkerState::Expired;
                    expired.push(std::mem::take(&mut entry.workers));
                    false
                } else {
                    true
                }
            });
        }
        self.last_sweep.store(now, Ordering::Relaxed);

        let count = expired.len();
        if count > 0 {
            self.expired_total.fetch_add(count as u64, Ordering::Relaxed);
            debug!(expired = count, "idle streams swept");
        }
        for workers in expired {
            self.destroy(workers);
        }
        count
    }

    /// Destroy every stream and refuse further input. Idempotent.
    pub fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<_> = self.entries.lock().drain().map(|(_, e)| e).collect();

        let count = drained.len();
        for entry in drained {
            let workers = {
                let mut entry = entry.lock();
                entry.state = WorkerState::Closed;
                std::mem::take(&mut entry.workers)
            };
            self.destroy(workers);
        }
        if count > 0 {
            debug!(streams = count, "stream workers closed");
        }
        count
    }

    fn destroy(&self, workers: Workers) {
        for (index, worker) in workers {
            if let Some(dissector) = self.registry.stream_dissector(index) {
                dissector.destroy_worker(worker);
            }
        }
    }

    /// Lifecycle state of a live stream.
    pub fn state(&self, key: &StreamKey) -> Option<WorkerState> {
        let entry = self.entries.lock().get(key).cloned()?;
        let state = entry.lock().state;
        Some(state)
    }

    /// Bytes reassembled so far for a live stream.
    pub fn stream_len(&self, key: &StreamKey) -> Option<usize> {
        let entry = self.entries.lock().get(key).cloned()?;
        let len = entry.lock().buffer.len();
        Some(len)
    }

    /// Number of live streams.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Streams removed by sweeps since creation.
    pub fn expired_total(&self) -> u64 {
        self.expired_total.load(Ordering::Relaxed)
    }
}
