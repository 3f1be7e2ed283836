//! Output sinks attached to the active engine.
//!
//! The [`SinkRegistry`] is owned by the orchestrator for the whole run. Engines
//! get a borrowed [`SinkView`] of it and publish through that; a reset detaches
//! the view from the old engine and attaches the same view to the new one, so
//! sink identity and order never change.

pub mod image_dump;
pub mod sample;

use std::sync::Arc;

use tracing::{info, warn};

use crate::engine::FrameOutput;

pub use image_dump::ImageDump;
pub use sample::SampleOutput;

/// Ordered, borrowed view of the registered sinks.
pub type SinkView<'s> = &'s [Arc<dyn OutputSink>];

/// A consumer of engine output.
///
/// Sinks are driven from the engine's output path on the frame-loop thread and
/// notified or drained by the orchestrator, so they must be internally
/// thread-safe.
pub trait OutputSink: Send + Sync {
    fn name(&self) -> &str;

    /// Receive the output of one frame.
    fn publish(&self, output: &FrameOutput);

    /// The engine instance is being replaced: drop anything tied to it.
    fn reset(&self);

    /// Block until pending output work has completed.
    fn join(&self);
}

/// A sink with an interactive loop that must own the invoking thread.
pub trait Viewer: OutputSink {
    /// Block until the view is closed.
    fn run(&self);

    /// Ask [`run`](Viewer::run) to return once queued output is shown.
    fn close(&self);
}

/// Registered sinks in registration order.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: Vec<Arc<dyn OutputSink>>,
    viewer: Option<Arc<dyn Viewer>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sink: Arc<dyn OutputSink>) {
        info!("registered sink #{}: {}", self.sinks.len(), sink.name());
        self.sinks.push(sink);
    }

    /// Register the visualization sink. Only the first viewer gets the
    /// invoking thread; later ones are kept as plain sinks.
    pub fn register_viewer<V: Viewer + 'static>(&mut self, viewer: Arc<V>) {
        if self.viewer.is_some() {
            warn!("a viewer is already registered, {} runs as a plain sink", viewer.name());
        } else {
            self.viewer = Some(viewer.clone() as Arc<dyn Viewer>);
        }
        self.register(viewer);
    }

    pub fn view(&self) -> SinkView<'_> {
        &self.sinks
    }

    pub fn viewer(&self) -> Option<&Arc<dyn Viewer>> {
        self.viewer.as_ref()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Drain every sink, in registration order.
    pub fn join_all(&self) {
        for sink in &self.sinks {
            sink.join();
            info!("joined sink {}", sink.name());
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::testing::{RecordingSink, SinkEvent};
    use super::*;

    #[test]
    fn test_registry_keeps_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SinkRegistry::new();
        registry.register(RecordingSink::new("a", &log));
        registry.register_viewer(RecordingSink::new("viewer", &log));
        registry.register(RecordingSink::new("b", &log));

        let names: Vec<&str> = registry.view().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a", "viewer", "b"]);
        assert_eq!(registry.viewer().map(|v| v.name()), Some("viewer"));

        registry.join_all();
        let joined: Vec<SinkEvent> = log.lock().clone();
        assert_eq!(
            joined,
            vec![
                SinkEvent::Join { sink: "a".into() },
                SinkEvent::Join {
                    sink: "viewer".into()
                },
                SinkEvent::Join { sink: "b".into() },
            ]
        );
    }

    #[test]
    fn test_second_viewer_registers_as_plain_sink() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SinkRegistry::new();
        registry.register_viewer(RecordingSink::new("first", &log));
        registry.register_viewer(RecordingSink::new("second", &log));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.viewer().map(|v| v.name()), Some("first"));
    }
}
