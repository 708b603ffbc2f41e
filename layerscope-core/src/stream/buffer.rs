//! Growable, randomly readable byte store for reassembled streams.
//!
//! The logical length tracks bytes written; the physical reservation doubles
//! when it runs out. Mapped backends remap on growth, so slices returned by
//! [`StreamBuffer::read`] borrow the buffer and cannot outlive an append.

use std::fs::File;

use memmap2::MmapMut;
use tracing::warn;

use super::BufferBacking;
use crate::error::StreamError;

/// Smallest reservation for mapped backends (one page).
const MIN_MAPPING: usize = 4096;

enum Storage {
    Heap(Vec<u8>),
    Anonymous(MmapMut),
    File { file: File, map: MmapMut },
}

/// Append-only stream bytes with random reads.
pub struct StreamBuffer {
    storage: Storage,
    len: usize,
    limit: usize,
}

impl StreamBuffer {
    /// Create a buffer with the given backing.
    ///
    /// `limit` caps the logical length; appends past it are truncated.
    pub fn new(backing: BufferBacking, capacity: usize, limit: usize) -> Result<Self, StreamError> {
        let storage = match backing {
            BufferBacking::Heap => Storage::Heap(Vec::with_capacity(capacity.min(limit))),
            BufferBacking::Anonymous => Storage::Anonymous(map_anon(capacity.max(MIN_MAPPING))?),
            BufferBacking::File => {
                let file = tempfile::tempfile().map_err(|e| backing_error("file", e))?;
                let map = map_file(&file, capacity.max(MIN_MAPPING))?;
                Storage::File { file, map }
            }
        };

        Ok(Self {
            storage,
            len: 0,
            limit,
        })
    }

    /// Heap-backed buffer. Cannot fail.
    pub fn heap(limit: usize) -> Self {
        Self {
            storage: Storage::Heap(Vec::new()),
            len: 0,
            limit,
        }
    }

    pub fn backing(&self) -> BufferBacking {
        match self.storage {
            Storage::Heap(_) => BufferBacking::Heap,
            Storage::Anonymous(_) => BufferBacking::Anonymous,
            Storage::File { .. } => BufferBacking::File,
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current physical reservation.
    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Heap(v) => v.capacity(),
            Storage::Anonymous(map) => map.len(),
            Storage::File { map, .. } => map.len(),
        }
    }

    /// Whether the per-stream limit has been reached.
    pub fn is_full(&self) -> bool {
        self.len >= self.limit
    }

    /// Append `data`, returning how many bytes were written.
    ///
    /// Fewer than `data.len()` bytes are written once the limit is reached
    /// or if a mapped backend cannot grow.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let wanted = data.len().min(self.limit.saturating_sub(self.len));
        if wanted == 0 {
            return 0;
        }

        let n = match self.reserve(self.len + wanted) {
            Ok(()) => wanted,
            Err(e) => {
                warn!(error = %e, len = self.len, "stream buffer could not grow");
                wanted.min(self.capacity().saturating_sub(self.len))
            }
        };

        let start = self.len;
        match &mut self.storage {
            Storage::Heap(v) => v.extend_from_slice(&data[..n]),
            Storage::Anonymous(map) => map[start..start + n].copy_from_slice(&data[..n]),
            Storage::File { map, .. } => map[start..start + n].copy_from_slice(&data[..n]),
        }
        self.len += n;
        n
    }

    /// Up to `max` bytes starting at `offset`. Empty past the end.
    pub fn read(&self, offset: usize, max: usize) -> &[u8] {
        let start = offset.min(self.len);
        let end = start.saturating_add(max).min(self.len);
        &self.as_slice()[start..end]
    }

    /// Everything written so far.
    pub fn as_slice(&self) -> &[u8] {
        match &self.storage {
            Storage::Heap(v) => &v[..self.len],
            Storage::Anonymous(map) => &map[..self.len],
            Storage::File { map, .. } => &map[..self.len],
        }
    }

    fn reserve(&mut self, needed: usize) -> Result<(), StreamError> {
        let capacity = self.capacity();
        if needed <= capacity {
            return Ok(());
        }
        let new_capacity = needed.max(capacity.saturating_mul(2)).min(self.limit.max(needed));

        match &mut self.storage {
            Storage::Heap(v) => v.reserve(new_capacity - v.len()),
            Storage::Anonymous(map) => {
                let mut grown = map_anon(new_capacity)?;
                grown[..self.len].copy_from_slice(&map[..self.len]);
                *map = grown;
            }
            Storage::File { file, map } => {
                map.flush_async().map_err(|e| backing_error("file", e))?;
                *map = map_file(file, new_capacity)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("backing", &self.backing())
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("limit", &self.limit)
            .finish()
    }
}

fn backing_error(backing: &'static str, source: std::io::Error) -> StreamError {
    StreamError::Backing { backing, source }
}

fn map_anon(len: usize) -> Result<MmapMut, StreamError> {
    MmapMut::map_anon(len).map_err(|e| backing_error("anon", e))
}

fn map_file(file: &File, len: usize) -> Result<MmapMut, StreamError> {
    file.set_len(len as u64)
        .map_err(|e| backing_error("file", e))?;
    // SAFETY: the file is an unlinked temporary owned by this buffer, so no
    // other process or handle can truncate it while mapped.
    unsafe { MmapMut::map_mut(file) }.map_err(|e| backing_error("file", e))
}
