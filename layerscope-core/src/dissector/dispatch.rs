//! Frame-scoped dispatch loop.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::frame::RawFrame;
use crate::intern::Interner;
use crate::layer::{LayerId, LayerTree};

use super::{Analysis, FrameWorker, Registry};

/// Drives frame-scoped dissection with one worker per registered dissector.
///
/// Workers are created in [`Dispatcher::new`] and destroyed by
/// [`Dispatcher::close`]; after closing, `dissect` only produces the root
/// layer.
pub struct Dispatcher {
    registry: Arc<Registry>,
    workers: RwLock<Vec<Box<dyn FrameWorker>>>,
    max_depth: usize,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, interner: &Interner, max_depth: usize) -> Self {
        let workers = registry
            .dissectors()
            .map(|(d, _)| d.create_worker(interner))
            .collect();

        Self {
            registry,
            workers: RwLock::new(workers),
            max_depth,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Build the layer tree for one frame.
    ///
    /// Starting from the root, every dissector whose pattern matches a
    /// layer's path is offered that layer, in registration order. Each
    /// emitted child is queued and offered in turn. Layers at `max_depth`
    /// are not expanded further.
    pub fn dissect(&self, frame: &RawFrame) -> LayerTree {
        let workers = self.workers.read();
        let mut tree = LayerTree::new(frame.data.len());
        let mut queue = VecDeque::from([LayerId::ROOT]);
        let mut depth_hit = false;

        while let Some(id) = queue.pop_front() {
            let path = tree[id].path().clone();

            if path.len() >= self.max_depth {
                depth_hit |= self.registry.matching(&path).next().is_some();
                continue;
            }

            for index in self.registry.matching(&path) {
                let Some(worker) = workers.get(index) else {
                    continue;
                };

                let emitted = worker.analyze(&Analysis::new(frame, &tree, id));
                let Some(builder) = emitted else {
                    trace!(
                        frame = frame.seq,
                        dissector = ?self.registry.dissector(index).map(|d| d.name()),
                        path = %path,
                        "declined"
                    );
                    continue;
                };

                let layer = builder.finish(&path, tree[id].payload());
                if let Some(child) = tree.push_child(id, layer) {
                    queue.push_back(child);
                }
            }
        }

        if depth_hit {
            warn!(
                frame = frame.seq,
                max_depth = self.max_depth,
                "dissection stopped at depth bound"
            );
        }

        tree
    }

    /// Destroy every worker. Idempotent.
    pub fn close(&self) {
        let mut workers = self.workers.write();
        if workers.is_empty() {
            return;
        }
        debug!(workers = workers.len(), "destroying frame workers");
        for (index, worker) in workers.drain(..).enumerate() {
            if let Some(dissector) = self.registry.dissector(index) {
                dissector.destroy_worker(worker);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dissector::Dissector;
    use crate::intern::Symbol;
    use crate::layer::{LayerBuilder, PathPattern};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Emits a `loop` layer below every layer, including its own.
    struct Looping;

    struct LoopWorker(Symbol);

    impl FrameWorker for LoopWorker {
        fn analyze(&self, cx: &Analysis<'_>) -> Option<LayerBuilder> {
            Some(cx.child(&self.0))
        }
    }

    impl Dissector for Looping {
        fn name(&self) -> &'static str {
            "loop"
        }

        fn patterns(&self) -> Vec<PathPattern> {
            vec![PathPattern::anywhere(&[])]
        }

        fn create_worker(&self, interner: &Interner) -> Box<dyn FrameWorker> {
            Box::new(LoopWorker(interner.intern("loop")))
        }
    }

    struct Counted(Arc<AtomicUsize>);

    impl Dissector for Counted {
        fn name(&self) -> &'static str {
            "counted"
        }

        fn patterns(&self) -> Vec<PathPattern> {
            vec![PathPattern::root()]
        }

        fn create_worker(&self, _interner: &Interner) -> Box<dyn FrameWorker> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::new(LoopWorker(Symbol::new("counted")))
        }

        fn destroy_worker(&self, worker: Box<dyn FrameWorker>) {
            self.0.fetch_sub(1, Ordering::SeqCst);
            drop(worker);
        }
    }

    #[test]
    fn test_self_matching_dissector_stops_at_depth_bound() {
        let mut registry = Registry::new();
        registry.register(Looping);
        let dispatcher = Dispatcher::new(Arc::new(registry), &Interner::new(), 5);

        let tree = dispatcher.dissect(&RawFrame::ethernet(1, 0, vec![0u8; 4]));
        assert_eq!(tree.len(), 6);
        assert_eq!(tree.deepest().path().len(), 5);
    }

    #[test]
    fn test_workers_created_once_and_destroyed_on_close() {
        let live = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        registry.register(Counted(Arc::clone(&live)));

        let dispatcher = Dispatcher::new(Arc::new(registry), &Interner::new(), 4);
        dispatcher.dissect(&RawFrame::ethernet(1, 0, vec![0u8; 4]));
        dispatcher.dissect(&RawFrame::ethernet(2, 0, vec![0u8; 4]));
        assert_eq!(live.load(Ordering::SeqCst), 1);

        dispatcher.close();
        dispatcher.close();
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.dissect(&RawFrame::ethernet(3, 0, vec![0u8; 4])).len(), 1);
    }
}
