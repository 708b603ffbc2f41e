//! Dissector registry.

use std::sync::Arc;

use crate::layer::{NamespacePath, PathPattern};

use super::{Dissector, StreamDissector};

struct Registration<D: ?Sized> {
    patterns: Vec<PathPattern>,
    dissector: Arc<D>,
}

impl<D: ?Sized> Registration<D> {
    fn matches(&self, path: &NamespacePath) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }
}

/// Registered dissectors, in registration order.
///
/// When several dissectors match the same path they are all invoked, in the
/// order they were registered.
#[derive(Default)]
pub struct Registry {
    frame: Vec<Registration<dyn Dissector>>,
    stream: Vec<Registration<dyn StreamDissector>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a frame-scoped dissector.
    pub fn register<D: Dissector + 'static>(&mut self, dissector: D) -> &mut Self {
        self.frame.push(Registration {
            patterns: dissector.patterns(),
            dissector: Arc::new(dissector),
        });
        self
    }

    /// Register a stream-scoped dissector.
    pub fn register_stream<D: StreamDissector + 'static>(&mut self, dissector: D) -> &mut Self {
        self.stream.push(Registration {
            patterns: dissector.patterns(),
            dissector: Arc::new(dissector),
        });
        self
    }

    /// Indices of frame dissectors whose patterns match `path`.
    pub fn matching<'a>(&'a self, path: &'a NamespacePath) -> impl Iterator<Item = usize> + 'a {
        self.frame
            .iter()
            .enumerate()
            .filter(move |(_, r)| r.matches(path))
            .map(|(i, _)| i)
    }

    /// Indices of stream dissectors whose patterns match `path`.
    pub fn matching_streams<'a>(
        &'a self,
        path: &'a NamespacePath,
    ) -> impl Iterator<Item = usize> + 'a {
        self.stream
            .iter()
            .enumerate()
            .filter(move |(_, r)| r.matches(path))
            .map(|(i, _)| i)
    }

    pub fn dissector(&self, index: usize) -> Option<&dyn Dissector> {
        self.frame.get(index).map(|r| r.dissector.as_ref())
    }

    pub fn stream_dissector(&self, index: usize) -> Option<&dyn StreamDissector> {
        self.stream.get(index).map(|r| r.dissector.as_ref())
    }

    /// Get a frame dissector by name.
    pub fn get(&self, name: &str) -> Option<&dyn Dissector> {
        self.frame
            .iter()
            .find(|r| r.dissector.name() == name)
            .map(|r| r.dissector.as_ref())
    }

    /// Frame dissectors with their patterns.
    pub fn dissectors(&self) -> impl Iterator<Item = (&dyn Dissector, &[PathPattern])> {
        self.frame
            .iter()
            .map(|r| (r.dissector.as_ref(), r.patterns.as_slice()))
    }

    /// Stream dissectors with their patterns.
    pub fn stream_dissectors(
        &self,
    ) -> impl Iterator<Item = (&dyn StreamDissector, &[PathPattern])> {
        self.stream
            .iter()
            .map(|r| (r.dissector.as_ref(), r.patterns.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.frame.len() + self.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
