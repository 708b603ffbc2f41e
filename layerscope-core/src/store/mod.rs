//! Concurrent, append-only store of dissected frames.
//!
//! The store is a log of published segments. A producer accumulates frames
//! privately (see [`FrameBatch`]) and publishes the finished segment with a
//! single push under the lock, so readers only ever see whole batches of
//! fully dissected frames. Readers hold independent [`CursorId`]s; dequeuing
//! copies `Arc` handles out of the shared segments and never removes data
//! another cursor still needs.
//!
//! With [`StoreConfig::evict_consumed`] set, segments that every open cursor
//! has passed are released, mirroring reader-aware cache eviction.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::error::StoreError;
use crate::frame::Frame;

/// Handle for one reader's position in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorId(u64);

impl fmt::Display for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of a dequeue.
#[derive(Debug, Clone)]
pub enum Dequeued {
    /// Next frames for this cursor, in insertion order
    Frames(Vec<Arc<Frame>>),
    /// Nothing available yet (non-blocking and timed calls only)
    Empty,
    /// The cursor or store is closed and the cursor has read everything
    Closed,
}

impl Dequeued {
    pub fn is_closed(&self) -> bool {
        matches!(self, Dequeued::Closed)
    }

    /// The frames, or an empty vector for `Empty` and `Closed`.
    pub fn into_frames(self) -> Vec<Arc<Frame>> {
        match self {
            Dequeued::Frames(frames) => frames,
            _ => Vec::new(),
        }
    }
}

/// Configuration for the frame store.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Release segments every open cursor has read past.
    pub evict_consumed: bool,
}

impl StoreConfig {
    pub fn with_evict_consumed(mut self, evict: bool) -> Self {
        self.evict_consumed = evict;
        self
    }
}

/// Store counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub inserted: u64,
    pub retained: u64,
    pub evicted: u64,
    pub cursors: usize,
}

struct Segment {
    start: u64,
    frames: Arc<[Arc<Frame>]>,
}

impl Segment {
    fn end(&self) -> u64 {
        self.start + self.frames.len() as u64
    }
}

struct Cursor {
    next: u64,
    /// Set by `close_cursor`: no frames past this index are delivered.
    end: Option<u64>,
}

#[derive(Default)]
struct Shared {
    segments: VecDeque<Segment>,
    total: u64,
    evicted: u64,
    cursors: HashMap<CursorId, Cursor>,
    next_cursor: u64,
    closed: bool,
}

enum Step {
    Take(Vec<(Arc<[Arc<Frame>]>, Range<usize>)>),
    Closed,
    Wait,
}

/// Append-only frame log with per-reader cursors.
pub struct FrameStore {
    shared: Mutex<Shared>,
    available: Condvar,
    config: StoreConfig,
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl FrameStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            shared: Mutex::new(Shared::default()),
            available: Condvar::new(),
            config,
        }
    }

    /// Append one frame.
    pub fn insert(&self, frame: impl Into<Arc<Frame>>) -> Result<(), StoreError> {
        self.publish(vec![frame.into()]).map(|_| ())
    }

    /// Append frames as one atomic segment.
    pub fn insert_batch<I>(&self, frames: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = Arc<Frame>>,
    {
        self.publish(frames.into_iter().collect())
    }

    /// Start a private batch that becomes visible on [`FrameBatch::publish`].
    pub fn batch(&self) -> FrameBatch<'_> {
        FrameBatch {
            store: self,
            pending: Vec::new(),
        }
    }

    fn publish(&self, frames: Vec<Arc<Frame>>) -> Result<usize, StoreError> {
        let n = frames.len();
        if n == 0 {
            return Ok(0);
        }
        let frames: Arc<[Arc<Frame>]> = frames.into();

        {
            let mut shared = self.shared.lock();
            if shared.closed {
                return Err(StoreError::Closed);
            }
            let start = shared.total;
            shared.total += n as u64;
            shared.segments.push_back(Segment { start, frames });
        }

        trace!(frames = n, "segment published");
        self.available.notify_all();
        Ok(n)
    }

    /// Total frames ever inserted.
    pub fn size(&self) -> u64 {
        self.shared.lock().total
    }

    pub fn stats(&self) -> StoreStats {
        let shared = self.shared.lock();
        StoreStats {
            inserted: shared.total,
            retained: shared.total - shared.evicted,
            evicted: shared.evicted,
            cursors: shared.cursors.len(),
        }
    }

    /// Open a cursor at the oldest retained frame.
    pub fn open_cursor(&self) -> CursorId {
        let mut shared = self.shared.lock();
        let id = CursorId(shared.next_cursor);
        shared.next_cursor += 1;
        let next = shared.evicted;
        shared.cursors.insert(id, Cursor { next, end: None });
        debug!(cursor = %id, start = next, "cursor opened");
        id
    }

    /// Forget a cursor entirely.
    pub fn release_cursor(&self, id: CursorId) -> Result<(), StoreError> {
        let mut shared = self.shared.lock();
        shared
            .cursors
            .remove(&id)
            .ok_or(StoreError::UnknownCursor(id))?;
        self.evict(&mut shared);
        drop(shared);
        self.available.notify_all();
        Ok(())
    }

    /// No frames inserted after this call reach `id`. Once it has read up
    /// to this point, dequeue reports [`Dequeued::Closed`].
    pub fn close_cursor(&self, id: CursorId) -> Result<(), StoreError> {
        {
            let mut shared = self.shared.lock();
            let total = shared.total;
            let cursor = shared
                .cursors
                .get_mut(&id)
                .ok_or(StoreError::UnknownCursor(id))?;
            cursor.end.get_or_insert(total);
            self.evict(&mut shared);
        }
        self.available.notify_all();
        Ok(())
    }

    /// Stop accepting frames and wake every waiting reader. Idempotent.
    pub fn close(&self) {
        let was_open = {
            let mut shared = self.shared.lock();
            !std::mem::replace(&mut shared.closed, true)
        };
        if was_open {
            debug!("frame store closed");
        }
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Next unread index for `id`.
    pub fn cursor_position(&self, id: CursorId) -> Option<u64> {
        self.shared.lock().cursors.get(&id).map(|c| c.next)
    }

    /// Up to `max` frames for `id`, blocking until some are available or
    /// the cursor is closed.
    pub fn dequeue(&self, id: CursorId, max: usize) -> Result<Dequeued, StoreError> {
        let mut shared = self.shared.lock();
        loop {
            match self.step(&mut shared, id, max)? {
                Step::Wait => self.available.wait(&mut shared),
                step => {
                    drop(shared);
                    return Ok(Self::finish(step));
                }
            }
        }
    }

    /// Like [`dequeue`](Self::dequeue) but returns `Empty` instead of
    /// blocking.
    pub fn try_dequeue(&self, id: CursorId, max: usize) -> Result<Dequeued, StoreError> {
        let step = self.step(&mut self.shared.lock(), id, max)?;
        Ok(Self::finish(step))
    }

    /// Like [`dequeue`](Self::dequeue) but gives up with `Empty` after
    /// `timeout`.
    pub fn dequeue_timeout(
        &self,
        id: CursorId,
        max: usize,
        timeout: Duration,
    ) -> Result<Dequeued, StoreError> {
        let deadline = Instant::now() + timeout;
        let mut shared = self.shared.lock();
        loop {
            match self.step(&mut shared, id, max)? {
                Step::Wait => {
                    if self.available.wait_until(&mut shared, deadline).timed_out() {
                        let step = self.step(&mut shared, id, max)?;
                        return Ok(Self::finish(step));
                    }
                }
                step => {
                    drop(shared);
                    return Ok(Self::finish(step));
                }
            }
        }
    }

    /// Advance `id` under the lock, collecting segment handles only.
    fn step(&self, shared: &mut Shared, id: CursorId, max: usize) -> Result<Step, StoreError> {
        let total = shared.total;
        let closed = shared.closed;
        let cursor = shared
            .cursors
            .get_mut(&id)
            .ok_or(StoreError::UnknownCursor(id))?;

        let limit = cursor.end.map_or(total, |end| end.min(total));
        if cursor.next >= limit {
            return Ok(if closed || cursor.end.is_some() {
                Step::Closed
            } else {
                Step::Wait
            });
        }

        let from = cursor.next;
        let to = limit.min(from + max.max(1) as u64);
        cursor.next = to;

        let first = shared.segments.partition_point(|s| s.end() <= from);
        let mut slices = Vec::new();
        for segment in shared.segments.range(first..) {
            if segment.start >= to {
                break;
            }
            let lo = from.max(segment.start) - segment.start;
            let hi = to.min(segment.end()) - segment.start;
            slices.push((Arc::clone(&segment.frames), lo as usize..hi as usize));
        }

        self.evict(shared);
        Ok(Step::Take(slices))
    }

    fn evict(&self, shared: &mut Shared) {
        if !self.config.evict_consumed {
            return;
        }
        // A closed cursor that has read up to its end no longer holds frames.
        let Some(min_next) = shared
            .cursors
            .values()
            .filter(|c| c.end.map_or(true, |end| c.next < end))
            .map(|c| c.next)
            .min()
        else {
            return;
        };
        while shared
            .segments
            .front()
            .is_some_and(|s| s.end() <= min_next)
        {
            if let Some(segment) = shared.segments.pop_front() {
                shared.evicted += segment.frames.len() as u64;
            }
        }
    }

    fn finish(step: Step) -> Dequeued {
        match step {
            Step::Take(slices) => Dequeued::Frames(
                slices
                    .into_iter()
                    .flat_map(|(frames, range)| frames[range].to_vec())
                    .collect(),
            ),
            Step::Closed => Dequeued::Closed,
            Step::Wait => Dequeued::Empty,
        }
    }
}

/// Frames accumulated privately before an atomic publish.
pub struct FrameBatch<'a> {
    store: &'a FrameStore,
    pending: Vec<Arc<Frame>>,
}

impl FrameBatch<'_> {
    pub fn push(&mut self, frame: impl Into<Arc<Frame>>) {
        self.pending.push(frame.into());
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Make every pushed frame visible at once.
    pub fn publish(self) -> Result<usize, StoreError> {
        self.store.publish(self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RawFrame;
    use crate::layer::LayerTree;

    fn frame(seq: u64) -> Arc<Frame> {
        Arc::new(Frame::new(
            RawFrame::ethernet(seq, seq * 1000, vec![0u8; 8]),
            LayerTree::new(8),
        ))
    }

    fn seqs(d: Dequeued) -> Vec<u64> {
        d.into_frames().iter().map(|f| f.seq()).collect()
    }

    #[test]
    fn test_dequeue_in_insertion_order() {
        let store = FrameStore::default();
        for seq in 1..=5 {
            store.insert(frame(seq)).unwrap();
        }
        let cursor = store.open_cursor();

        assert_eq!(seqs(store.dequeue(cursor, 2).unwrap()), vec![1, 2]);
        assert_eq!(seqs(store.dequeue(cursor, 10).unwrap()), vec![3, 4, 5]);
        assert!(matches!(store.try_dequeue(cursor, 1).unwrap(), Dequeued::Empty));
        assert_eq!(store.size(), 5);
    }

    #[test]
    fn test_cursors_are_independent() {
        let store = FrameStore::default();
        store.insert_batch((1..=3).map(frame)).unwrap();

        let a = store.open_cursor();
        let b = store.open_cursor();
        assert_eq!(seqs(store.dequeue(a, 3).unwrap()), vec![1, 2, 3]);
        assert_eq!(seqs(store.dequeue(b, 1).unwrap()), vec![1]);
        assert_eq!(store.cursor_position(a), Some(3));
        assert_eq!(store.cursor_position(b), Some(1));
    }

    #[test]
    fn test_dequeue_spans_segments() {
        let store = FrameStore::default();
        store.insert_batch((1..=2).map(frame)).unwrap();
        store.insert_batch((3..=4).map(frame)).unwrap();
        store.insert(frame(5)).unwrap();

        let cursor = store.open_cursor();
        store.dequeue(cursor, 1).unwrap();
        assert_eq!(seqs(store.dequeue(cursor, 3).unwrap()), vec![2, 3, 4]);
    }

    #[test]
    fn test_closed_cursor_drains_then_reports_end() {
        let store = FrameStore::default();
        let cursor = store.open_cursor();
        store.insert(frame(1)).unwrap();
        store.close_cursor(cursor).unwrap();
        store.insert(frame(2)).unwrap();

        assert_eq!(seqs(store.dequeue(cursor, 10).unwrap()), vec![1]);
        assert!(store.dequeue(cursor, 10).unwrap().is_closed());
    }

    #[test]
    fn test_close_rejects_inserts_and_wakes_readers() {
        let store = Arc::new(FrameStore::default());
        let cursor = store.open_cursor();

        let reader = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.dequeue(cursor, 1).unwrap())
        };
        std::thread::sleep(Duration::from_millis(20));
        store.close();

        assert!(reader.join().unwrap().is_closed());
        assert_eq!(store.insert(frame(1)), Err(StoreError::Closed));
    }

    #[test]
    fn test_dequeue_timeout() {
        let store = FrameStore::default();
        let cursor = store.open_cursor();
        let result = store
            .dequeue_timeout(cursor, 1, Duration::from_millis(10))
            .unwrap();
        assert!(matches!(result, Dequeued::Empty));
    }

    #[test]
    fn test_unknown_cursor() {
        let store = FrameStore::default();
        let cursor = store.open_cursor();
        store.release_cursor(cursor).unwrap();
        assert_eq!(
            store.try_dequeue(cursor, 1).unwrap_err(),
            StoreError::UnknownCursor(cursor)
        );
    }

    #[test]
    fn test_batch_publish_is_atomic() {
        let store = FrameStore::default();
        let cursor = store.open_cursor();

        let mut batch = store.batch();
        batch.push(frame(1));
        batch.push(frame(2));
        assert!(matches!(store.try_dequeue(cursor, 10).unwrap(), Dequeued::Empty));

        assert_eq!(batch.publish().unwrap(), 2);
        assert_eq!(seqs(store.try_dequeue(cursor, 10).unwrap()), vec![1, 2]);
    }

    #[test]
    fn test_evict_consumed_waits_for_slowest_cursor() {
        let store = FrameStore::new(StoreConfig::default().with_evict_consumed(true));
        let fast = store.open_cursor();
        let slow = store.open_cursor();
        store.insert_batch((1..=2).map(frame)).unwrap();
        store.insert_batch((3..=4).map(frame)).unwrap();

        store.dequeue(fast, 4).unwrap();
        assert_eq!(store.stats().evicted, 0);

        assert_eq!(seqs(store.dequeue(slow, 2).unwrap()), vec![1, 2]);
        assert_eq!(store.stats().evicted, 2);
        assert_eq!(store.stats().retained, 2);

        let late = store.open_cursor();
        assert_eq!(seqs(store.dequeue(late, 10).unwrap()), vec![3, 4]);
    }

    #[test]
    fn test_drained_closed_cursor_does_not_pin_eviction() {
        let store = FrameStore::new(StoreConfig::default().with_evict_consumed(true));
        let done = store.open_cursor();
        let reader = store.open_cursor();
        store.insert_batch((1..=2).map(frame)).unwrap();

        store.close_cursor(done).unwrap();
        assert_eq!(seqs(store.dequeue(done, 10).unwrap()), vec![1, 2]);
        assert!(matches!(store.dequeue(done, 10).unwrap(), Dequeued::Closed));

        store.insert_batch((3..=4).map(frame)).unwrap();
        assert_eq!(seqs(store.dequeue(reader, 10).unwrap()), vec![1, 2, 3, 4]);
        assert_eq!(store.stats().evicted, 4);
        assert_eq!(store.stats().retained, 0);
    }
}
