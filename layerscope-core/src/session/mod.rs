//! Dissection sessions.
//!
//! A [`Session`] owns everything with session lifetime: the interner, one
//! frame worker per dissector, the stream table and the frame store.
//! Frames are processed in two phases:
//!
//! 1. Frame-scoped dissection, in parallel across `config.threads`.
//! 2. Stream-scoped dissection, in frame order, attaching whatever the
//!    stream workers emit below each anchor layer.
//!
//! The finished frames of a batch are then published to the store at once.

mod pipeline;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, info, trace};

use crate::config::SessionConfig;
use crate::dissector::{Dispatcher, Registry};
use crate::error::{Result, StoreError};
use crate::frame::{Frame, RawFrame};
use crate::intern::Interner;
use crate::layer::{ByteRange, LayerId, LayerTree, NamespacePath, StreamAnchor};
use crate::store::FrameStore;
use crate::stream::StreamTable;

pub use pipeline::Pipeline;

/// One dissection run over a sequence of frames.
pub struct Session {
    interner: Arc<Interner>,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    streams: StreamTable,
    store: Arc<FrameStore>,
    config: SessionConfig,
    closed: AtomicBool,
}

impl Session {
    /// Create a session and its frame workers.
    pub fn new(registry: Arc<Registry>, config: SessionConfig) -> Self {
        let interner = Arc::new(Interner::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry), &interner, config.max_depth);
        let streams = StreamTable::new(
            Arc::clone(&registry),
            Arc::clone(&interner),
            config.stream.clone(),
        );
        let store = Arc::new(FrameStore::new(config.store.clone()));

        debug!(
            dissectors = registry.len(),
            threads = config.threads,
            max_depth = config.max_depth,
            "session created"
        );

        Self {
            interner,
            registry,
            dispatcher,
            streams,
            store,
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// Dissect one frame, streams included, without storing it.
    pub fn dissect(&self, raw: RawFrame) -> Arc<Frame> {
        let mut tree = self.dispatcher.dissect(&raw);
        self.attach_streams(&raw, &mut tree);
        Arc::new(Frame::new(raw, tree))
    }

    /// Dissect one frame and append it to the store.
    pub fn ingest(&self, raw: RawFrame) -> Result<Arc<Frame>> {
        self.ensure_open()?;
        let now = raw.timestamp_ns;
        let frame = self.dissect(raw);
        self.store.insert(Arc::clone(&frame))?;
        self.streams.maybe_sweep(now);
        Ok(frame)
    }

    /// Dissect a batch and publish it to the store as one unit. Readers see
    /// either none or all of the batch.
    pub fn ingest_batch(&self, frames: Vec<RawFrame>) -> Result<usize> {
        self.ensure_open()?;
        if frames.is_empty() {
            return Ok(0);
        }

        let trees = self.dissect_parallel(&frames);

        let mut batch = self.store.batch();
        let mut latest = 0;
        for (raw, mut tree) in frames.into_iter().zip(trees) {
            self.attach_streams(&raw, &mut tree);
            latest = latest.max(raw.timestamp_ns);
            batch.push(Frame::new(raw, tree));
        }
        let published = batch.publish()?;

        self.streams.maybe_sweep(latest);
        trace!(frames = published, "batch published");
        Ok(published)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StoreError::Closed.into());
        }
        Ok(())
    }

    /// Frame-scoped phase. Trees are returned in input order.
    fn dissect_parallel(&self, frames: &[RawFrame]) -> Vec<LayerTree> {
        let dispatcher = &self.dispatcher;
        let threads = self.config.threads.clamp(1, frames.len());
        if threads == 1 {
            return frames.iter().map(|f| dispatcher.dissect(f)).collect();
        }

        let per_thread = frames.len().div_ceil(threads);
        std::thread::scope(|s| {
            let handles: Vec<_> = frames
                .chunks(per_thread)
                .map(|chunk| {
                    s.spawn(move || chunk.iter().map(|f| dispatcher.dissect(f)).collect::<Vec<_>>())
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    }

    /// Stream-scoped phase for one frame.
    fn attach_streams(&self, raw: &RawFrame, tree: &mut LayerTree) {
        let anchors: SmallVec<[(LayerId, NamespacePath, StreamAnchor, ByteRange); 2]> = tree
            .iter()
            .filter_map(|(id, layer)| {
                let anchor = layer.stream()?;
                Some((id, layer.path().clone(), anchor.clone(), layer.payload()))
            })
            .collect();

        for (id, path, anchor, payload) in anchors {
            let data = payload.slice(&raw.data);
            let emitted = self.streams.feed(
                &path,
                &anchor.key,
                anchor.seq,
                &data,
                raw.timestamp_ns,
                raw.seq,
            );
            for builder in emitted {
                tree.push_child(id, builder.finish(&path, payload));
            }
        }
    }

    /// Expire streams idle at capture time `now`. Returns the number removed.
    pub fn sweep(&self, now: u64) -> usize {
        self.streams.sweep(now)
    }

    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }

    pub fn streams(&self) -> &StreamTable {
        &self.streams
    }

    pub fn interner(&self) -> &Arc<Interner> {
        &self.interner
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Destroy all workers, close the store and clear the interner.
    /// Frames already handed out stay valid. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let streams = self.streams.close_all();
        self.dispatcher.close();
        self.store.close();
        self.interner.clear();
        info!(frames = self.store.size(), streams, "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::default_registry;
    use crate::protocol::test_utils::{EthernetBuilder, Ipv4Builder, TcpBuilder, UdpBuilder};
    use crate::store::Dequeued;
    use crate::stream::StreamConfig;
    use std::time::Duration;

    const SECOND: u64 = 1_000_000_000;

    fn session(threads: usize) -> Session {
        Session::new(
            Arc::new(default_registry()),
            SessionConfig::default().with_threads(threads),
        )
    }

    fn udp(seq: u64, src: u16, dst: u16) -> RawFrame {
        let udp = UdpBuilder::new().src_port(src).dst_port(dst).payload(vec![0u8; 4]).build();
        let ip = Ipv4Builder::new().udp().payload(udp).build();
        RawFrame::ethernet(seq, seq * SECOND, EthernetBuilder::new().payload(ip).build())
    }

    fn tcp(seq: u64, tcp_seq: u32, payload: &[u8]) -> RawFrame {
        let tcp = TcpBuilder::new()
            .src_port(40000)
            .dst_port(80)
            .seq(tcp_seq)
            .psh_ack()
            .payload(payload.to_vec())
            .build();
        let ip = Ipv4Builder::new().tcp().payload(tcp).build();
        RawFrame::ethernet(seq, seq * SECOND, EthernetBuilder::new().payload(ip).build())
    }

    #[test]
    fn test_ingest_batch_publishes_in_order() {
        let session = session(4);
        let frames: Vec<_> = (1..=10).map(|i| udp(i, 1000 + i as u16, 53)).collect();
        assert_eq!(session.ingest_batch(frames).unwrap(), 10);
        assert_eq!(session.store().size(), 10);

        let cursor = session.store().open_cursor();
        let frames = session.store().try_dequeue(cursor, 100).unwrap().into_frames();
        let seqs: Vec<_> = frames.iter().map(|f| f.seq()).collect();
        assert_eq!(seqs, (1..=10).collect::<Vec<_>>());
        assert_eq!(frames[3].protocol_path(), "eth → ipv4 → udp");
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let frames: Vec<_> = (1..=37).map(|i| udp(i, i as u16, 53)).collect();
        let render = |s: &Session| {
            s.ingest_batch(frames.clone()).unwrap();
            let cursor = s.store().open_cursor();
            s.store()
                .try_dequeue(cursor, 100)
                .unwrap()
                .into_frames()
                .iter()
                .map(|f| {
                    let udp = f.layer("udp").unwrap();
                    (f.seq(), udp.value("udp.src").cloned())
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(render(&session(1)), render(&session(8)));
    }

    #[test]
    fn test_http_layer_attached_below_tcp() {
        let session = session(2);
        session
            .ingest_batch(vec![
                tcp(1, 100, b"GET /index.html HTTP/1.1\r\nHo"),
                tcp(2, 128, b"st: example.com\r\n\r\n"),
            ])
            .unwrap();

        let cursor = session.store().open_cursor();
        let frames = session.store().try_dequeue(cursor, 10).unwrap().into_frames();
        assert!(frames[0].layer("http").is_none());

        let http = frames[1].layer("http").unwrap();
        assert_eq!(http.path().to_string(), "eth → ipv4 → tcp → http");
        assert_eq!(http.value("http.path").and_then(|v| v.as_str()), Some("/index.html"));
        let tcp = frames[1].layer("tcp").unwrap();
        assert_eq!(http.range(), tcp.payload());
    }

    #[test]
    fn test_out_of_order_segments_reassembled() {
        let session = session(1);
        session.ingest(tcp(1, 500, b"GET /la")).unwrap();
        let early = session.ingest(tcp(2, 520, b"\r\n")).unwrap();
        let frame = session.ingest(tcp(3, 507, b"te HTTP/1.1\r\n")).unwrap();

        assert!(early.layer("http").is_none());

        let http = frame.layer("http").unwrap();
        assert_eq!(http.value("http.path").and_then(|v| v.as_str()), Some("/late"));
    }

    #[test]
    fn test_idle_streams_swept() {
        let config = SessionConfig::default()
            .with_threads(1)
            .with_stream(StreamConfig::default().with_idle_timeout(Duration::from_secs(30)));
        let session = Session::new(Arc::new(default_registry()), config);

        session.ingest(tcp(1, 0, b"GET / HTTP/1.1\r\n\r\n")).unwrap();
        assert_eq!(session.streams().len(), 1);
        assert_eq!(session.sweep(10 * SECOND), 0);
        assert_eq!(session.sweep(100 * SECOND), 1);
        assert!(session.streams().is_empty());
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_input() {
        let session = session(1);
        let kept = session.ingest(udp(1, 1, 2)).unwrap();
        session.close();
        session.close();

        assert!(session.is_closed());
        assert!(session.store().is_closed());
        assert!(session.ingest(udp(2, 1, 2)).is_err());
        assert!(session.ingest_batch(vec![udp(3, 1, 2)]).is_err());
        // Frames handed out before close stay readable.
        assert!(kept.layer("udp").is_some());

        let cursor = session.store().open_cursor();
        assert_eq!(session.store().try_dequeue(cursor, 10).unwrap().into_frames().len(), 1);
        assert!(matches!(session.store().try_dequeue(cursor, 10).unwrap(), Dequeued::Closed));
    }
}
